mod common;

use ioqueue::{Engine, Error, QToken, SgArray};
use std::time::{Duration, Instant};

fn pending_pop(engine: &Engine, qd: ioqueue::QDesc, sga: &SgArray) -> QToken {
    engine
        .pop(qd, sga)
        .expect("pop")
        .token()
        .expect("pop without data stays pending")
}

fn wait_until_complete(engine: &Engine, token: QToken) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !engine.is_complete(token).expect("known token") {
        assert!(Instant::now() < deadline, "operation never completed");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn wait_any_returns_the_completed_token_only() {
    let engine = Engine::new().expect("engine");
    let pairs: Vec<_> = (0..3).map(|_| common::connected_pair(&engine)).collect();
    let buffers: Vec<_> = (0..3).map(|_| SgArray::zeroed(&[8])).collect();

    let tokens: Vec<QToken> = pairs
        .iter()
        .zip(&buffers)
        .map(|((_, server), sga)| pending_pop(&engine, *server, sga))
        .collect();

    engine
        .blocking_push(pairs[1].0, &SgArray::from_bytes(b"two"))
        .expect("push");
    wait_until_complete(&engine, tokens[1]);

    let (index, completion) = engine.wait_any(&tokens).expect("wait_any");
    assert_eq!(index, 1);
    assert_eq!(completion.token, tokens[1]);
    assert_eq!(completion.qd, pairs[1].1);
    assert_eq!(buffers[1].gather(completion.result.expect("pop result")), b"two");

    assert!(!engine.is_complete(tokens[0]).expect("t1 still known"));
    assert!(!engine.is_complete(tokens[2]).expect("t3 still known"));

    let err = engine.wait_any(&[tokens[1]]).expect_err("retired token");
    assert!(matches!(err, Error::InvalidToken(raw) if raw == tokens[1].get()));
}

#[test]
fn wait_all_blocks_until_every_token_is_terminal() {
    let engine = Engine::new().expect("engine");
    let (client_a, server_a) = common::connected_pair(&engine);
    let (client_b, server_b) = common::connected_pair(&engine);

    let sga_a = SgArray::zeroed(&[8]);
    let sga_b = SgArray::zeroed(&[8]);
    let tokens = [
        pending_pop(&engine, server_a, &sga_a),
        pending_pop(&engine, server_b, &sga_b),
    ];

    engine
        .blocking_push(client_a, &SgArray::from_bytes(b"first"))
        .expect("push a");

    let started = Instant::now();
    let outcome = std::thread::scope(|scope| {
        let waiter = scope.spawn(|| engine.wait_all(&tokens));

        std::thread::sleep(Duration::from_millis(100));
        assert!(!waiter.is_finished(), "wait_all returned before every token finished");

        engine
            .blocking_push(client_b, &SgArray::from_bytes(b"second"))
            .expect("push b");
        waiter.join().expect("waiter thread")
    })
    .expect("wait_all");

    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(outcome.is_success());
    assert_eq!(outcome.len(), 2);
    assert_eq!(outcome.bytes(), "first".len() + "second".len());
    assert_eq!(outcome.completions[0].token, tokens[0]);
    assert_eq!(outcome.completions[1].token, tokens[1]);

    for token in tokens {
        assert!(engine.is_complete(token).is_err(), "wait_all retires every token");
    }
}

#[test]
fn wait_all_reports_partial_failure() {
    let engine = Engine::new().expect("engine");
    let (client, server) = common::connected_pair(&engine);
    let (_other_client, other_server) = common::connected_pair(&engine);

    let good = pending_pop(&engine, server, &SgArray::zeroed(&[4]));
    let doomed = pending_pop(&engine, other_server, &SgArray::zeroed(&[4]));

    engine
        .blocking_push(client, &SgArray::from_bytes(b"ok"))
        .expect("push");
    engine.close(other_server).expect("close");

    let outcome = engine.wait_all(&[good, doomed]).expect("wait_all");

    assert!(!outcome.is_success());
    assert_eq!(outcome.bytes(), 2);
    let failures: Vec<_> = outcome.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].token, doomed);
    assert!(matches!(
        failures[0].result,
        Err(Error::AlreadyClosed(qd)) if qd == other_server
    ));
}

#[test]
fn wait_rejects_bad_token_lists() {
    let engine = Engine::new().expect("engine");
    let (_client, server) = common::connected_pair(&engine);
    let token = pending_pop(&engine, server, &SgArray::zeroed(&[1]));

    assert!(matches!(engine.wait_any(&[]), Err(Error::InvalidToken(0))));
    assert!(matches!(
        engine.wait_all(&[token, token]),
        Err(Error::InvalidToken(_))
    ));

    let outcome = engine.wait_all(&[]).expect("empty wait_all");
    assert!(outcome.is_empty());

    // The duplicate check retired nothing.
    assert!(!engine.is_complete(token).expect("still pending"));
}

#[test]
fn wait_any_timeout_leaves_token_pending() {
    let engine = Engine::new().expect("engine");
    let (client, server) = common::connected_pair(&engine);
    let sga = SgArray::zeroed(&[4]);
    let token = pending_pop(&engine, server, &sga);

    let started = Instant::now();
    let outcome = engine
        .wait_any_timeout(&[token], Duration::from_millis(50))
        .expect("wait_any_timeout");
    assert!(outcome.is_none());
    assert!(started.elapsed() >= Duration::from_millis(50));

    engine
        .blocking_push(client, &SgArray::from_bytes(b"late"))
        .expect("push");
    let (index, completion) = engine
        .wait_any_timeout(&[token], Duration::from_secs(5))
        .expect("wait_any_timeout")
        .expect("completed in time");

    assert_eq!(index, 0);
    assert_eq!(sga.gather(completion.result.expect("pop result")), b"late");
}
