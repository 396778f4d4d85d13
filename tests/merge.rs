mod common;

use ioqueue::{Engine, Error, QueueKind, SgArray};

#[test]
fn merged_wait_resolves_the_operation_that_completed() {
    let engine = Engine::new().expect("engine");
    let (client_a, server_a) = common::connected_pair(&engine);
    let (_client_b, server_b) = common::connected_pair(&engine);

    let merged = engine.merge(server_a, server_b).expect("merge");
    assert_eq!(engine.kind(merged).expect("kind"), QueueKind::Merged);

    let sga_a = SgArray::zeroed(&[8]);
    let sga_b = SgArray::zeroed(&[8]);
    let token_a = engine.pop(server_a, &sga_a).expect("pop a").token().expect("pending");
    let token_b = engine.pop(server_b, &sga_b).expect("pop b").token().expect("pending");

    let live = engine.live_tokens(merged).expect("live tokens");
    let mut expected = vec![token_a, token_b];
    expected.sort();
    assert_eq!(live, expected);

    engine
        .blocking_push(client_a, &SgArray::from_bytes(b"for a"))
        .expect("push");

    let (index, completion) = engine.wait_any(&live).expect("wait_any");
    assert_eq!(live[index], token_a);
    assert_eq!(completion.token, token_a);
    assert_eq!(completion.qd, server_a);
    assert_eq!(sga_a.gather(completion.result.expect("pop result")), b"for a");

    assert_eq!(engine.live_tokens(merged).expect("live tokens"), vec![token_b]);
    assert!(!engine.is_complete(token_b).expect("b still pending"));
}

#[test]
fn merge_spans_network_and_file() {
    let engine = Engine::new().expect("engine");
    let (client, server) = common::connected_pair(&engine);
    let path = common::temp_path("merge");
    let file = engine.creat(&path, 0o644).expect("creat");

    let merged = engine.merge(server, file).expect("merge");
    let token = engine
        .pop(server, &SgArray::zeroed(&[4]))
        .expect("pop")
        .token()
        .expect("pending");

    // File writes finish on submission and never show up as live tokens.
    let pushed = engine
        .push(file, &SgArray::from_bytes(b"log"))
        .expect("file push");
    assert!(pushed.is_complete());
    assert_eq!(engine.live_tokens(merged).expect("live"), vec![token]);

    let nested = engine.merge(merged, client).expect("nested merge");
    assert_eq!(engine.live_tokens(nested).expect("nested live"), vec![token]);

    engine.close(file).expect("close file");
    let _ = std::fs::remove_file(path);
}

#[test]
fn merged_descriptor_has_no_data_path() {
    let engine = Engine::new().expect("engine");
    let (client, server) = common::connected_pair(&engine);
    let merged = engine.merge(client, server).expect("merge");

    assert!(matches!(
        engine.push(merged, &SgArray::from_bytes(b"x")),
        Err(Error::InvalidDescriptor(qd)) if qd == merged
    ));
    assert!(matches!(
        engine.pop(merged, &SgArray::zeroed(&[1])),
        Err(Error::InvalidDescriptor(_))
    ));
    assert!(matches!(engine.qd2fd(merged), Err(Error::InvalidDescriptor(_))));

    // Members keep working.
    engine
        .blocking_push(client, &SgArray::from_bytes(b"x"))
        .expect("member push");
}

#[test]
fn merge_rejects_bad_members() {
    let engine = Engine::new().expect("engine");
    let (client, server) = common::connected_pair(&engine);

    assert!(matches!(
        engine.merge(client, client),
        Err(Error::InvalidDescriptor(_))
    ));

    engine.close(server).expect("close");
    assert!(matches!(
        engine.merge(client, server),
        Err(Error::InvalidDescriptor(qd)) if qd == server
    ));
}

#[test]
fn closed_member_tokens_stay_visible_until_retired() {
    let engine = Engine::new().expect("engine");
    let (client, server) = common::connected_pair(&engine);
    let merged = engine.merge(client, server).expect("merge");

    let token = engine
        .pop(server, &SgArray::zeroed(&[4]))
        .expect("pop")
        .token()
        .expect("pending");
    engine.close(server).expect("close member");

    let live = engine.live_tokens(merged).expect("live");
    assert_eq!(live, vec![token]);

    let (_, completion) = engine.wait_any(&live).expect("wait_any");
    assert!(matches!(completion.result, Err(Error::AlreadyClosed(qd)) if qd == server));
    assert!(engine.live_tokens(merged).expect("live").is_empty());
}
