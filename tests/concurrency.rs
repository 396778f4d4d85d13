mod common;

use ioqueue::{Engine, QToken, SgArray};
use std::collections::HashSet;
use std::time::Duration;

#[test]
fn tokens_are_unique_across_threads() {
    let engine = Engine::new().expect("engine");
    let pairs: Vec<_> = (0..4).map(|_| common::connected_pair(&engine)).collect();

    let tokens: Vec<QToken> = std::thread::scope(|scope| {
        let handles: Vec<_> = pairs
            .iter()
            .map(|&(_, server)| {
                let engine = &engine;
                scope.spawn(move || {
                    (0..10)
                        .map(|_| {
                            engine
                                .pop(server, &SgArray::zeroed(&[1]))
                                .expect("pop")
                                .token()
                                .expect("pending")
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|handle| handle.join().expect("submitter thread"))
            .collect()
    });

    let unique: HashSet<_> = tokens.iter().copied().collect();
    assert_eq!(unique.len(), 40);
    assert!(tokens.iter().all(|token| token.get() != 0));
}

#[test]
fn blocked_waiter_does_not_stall_other_descriptors() {
    let engine = Engine::new().expect("engine");
    let (slow_client, slow_server) = common::connected_pair(&engine);
    let (fast_client, fast_server) = common::connected_pair(&engine);

    let slow_sga = SgArray::zeroed(&[4]);
    let slow = engine
        .pop(slow_server, &slow_sga)
        .expect("pop")
        .token()
        .expect("pending");

    std::thread::scope(|scope| {
        let waiter = scope.spawn(|| engine.wait_any(&[slow]));
        std::thread::sleep(Duration::from_millis(20));

        let sga = SgArray::zeroed(&[4]);
        let pop = engine.pop(fast_server, &sga).expect("fast pop");
        engine
            .blocking_push(fast_client, &SgArray::from_bytes(b"fast"))
            .expect("fast push");
        let n = common::settle(&engine, pop);
        assert_eq!(sga.gather(n), b"fast");
        assert!(!waiter.is_finished());

        engine
            .blocking_push(slow_client, &SgArray::from_bytes(b"slow"))
            .expect("slow push");
        let (_, completion) = waiter
            .join()
            .expect("waiter thread")
            .expect("wait_any");
        assert_eq!(slow_sga.gather(completion.result.expect("pop result")), b"slow");
    });
}

#[test]
fn caller_held_buffer_defers_transfer() {
    let engine = Engine::builder()
        .poll_interval(Duration::from_millis(5))
        .build()
        .expect("engine");
    let (client, server) = common::connected_pair(&engine);

    let sga = SgArray::zeroed(&[4]);
    let token = engine
        .pop(server, &sga)
        .expect("pop")
        .token()
        .expect("pending");

    let held = sga.elems()[0].buf.clone();

    std::thread::scope(|scope| {
        let guard_thread = scope.spawn(|| {
            // Writing through a clone takes the buffer lock briefly.
            for _ in 0..20 {
                held.copy_from_slice(&[0; 4]);
                std::thread::sleep(Duration::from_millis(1));
            }
        });

        engine
            .blocking_push(client, &SgArray::from_bytes(b"data"))
            .expect("push");
        guard_thread.join().expect("guard thread");
    });

    let (_, completion) = engine.wait_any(&[token]).expect("wait_any");
    let n = completion.result.expect("pop result");
    assert_eq!(n, 4);
}
