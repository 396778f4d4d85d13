#![allow(dead_code)]

use ioqueue::{Domain, Engine, QDesc, Submission, Type};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Returns `(client, server)`, two connected loopback TCP queues.
pub fn connected_pair(engine: &Engine) -> (QDesc, QDesc) {
    let listener = engine
        .queue(Domain::IPV4, Type::STREAM, None)
        .expect("listener queue");
    engine
        .bind(listener, "127.0.0.1:0".parse().expect("address"))
        .expect("bind");
    engine.listen(listener, 16).expect("listen");
    let address = engine.local_addr(listener).expect("local addr");

    let client = engine
        .queue(Domain::IPV4, Type::STREAM, None)
        .expect("client queue");
    engine.connect(client, address).expect("connect");
    let server = engine.blocking_accept(listener).expect("accept").qd;

    engine.close(listener).expect("close listener");
    (client, server)
}

pub fn temp_path(tag: &str) -> PathBuf {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock drift")
        .as_nanos();

    std::env::temp_dir().join(format!(
        "ioqueue-{}-{}-{}.tmp",
        tag,
        std::process::id(),
        unique
    ))
}

/// Bytes transferred by a submission, waiting on its token if needed.
pub fn settle(engine: &Engine, submission: Submission) -> usize {
    match submission {
        Submission::Complete(n) => n,
        Submission::Pending(token) => {
            let (_, completion) = engine.wait_any(&[token]).expect("wait_any");
            completion.result.expect("operation result")
        }
    }
}
