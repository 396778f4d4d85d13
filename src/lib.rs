//! Unified queue-descriptor I/O for sockets and files.
//!
//! Network connections and files are both exposed as *queues*, identified by
//! a [`QDesc`]. Data moves with the same two verbs regardless of the resource:
//! [`Engine::push`] writes a scatter-gather array, [`Engine::pop`] reads into
//! one. An operation that can finish immediately reports
//! [`Submission::Complete`]; otherwise it returns a [`QToken`] that is later
//! resolved with [`Engine::wait_any`] or [`Engine::wait_all`].
//!
//! # Architecture
//!
//! - **Engine**: context object owning every table; no process-wide state
//! - **DescriptorTable**: allocates and recycles queue descriptors
//! - **Backend**: socket and file transfers via `sendmsg`/`recvmsg` and `writev`/`readv`
//! - **SgArray**: scatter-gather description over shared [`IoBuf`]s
//! - **OpTracker**: token space and pending-operation records
//! - **Driver**: background thread polling native handles and resolving operations
//! - **Merge**: virtual descriptors spanning the completions of two others
//!
//! # Example
//! ```
//! use ioqueue::{Domain, Engine, SgArray, Submission, Type};
//!
//! let engine = Engine::new().unwrap();
//!
//! let listener = engine.queue(Domain::IPV4, Type::STREAM, None).unwrap();
//! engine.bind(listener, "127.0.0.1:0".parse().unwrap()).unwrap();
//! engine.listen(listener, 8).unwrap();
//! let address = engine.local_addr(listener).unwrap();
//!
//! let client = engine.queue(Domain::IPV4, Type::STREAM, None).unwrap();
//! engine.connect(client, address).unwrap();
//! let server = engine.blocking_accept(listener).unwrap().qd;
//!
//! let inbox = SgArray::zeroed(&[16]);
//! let pop = engine.pop(server, &inbox).unwrap();
//! engine.blocking_push(client, &SgArray::from_bytes(b"ping")).unwrap();
//!
//! let received = match pop {
//!     Submission::Complete(n) => n,
//!     Submission::Pending(token) => engine.wait_any(&[token]).unwrap().1.result.unwrap(),
//! };
//! assert_eq!(inbox.gather(received), &b"ping"[..received]);
//! ```

mod backend;
mod builder;
mod descriptor;
mod engine;
mod error;
mod merge;
mod reactor;
mod sga;
mod tracker;
mod utils;
mod wait;

pub use backend::OpenOptions;
pub use builder::EngineBuilder;
pub use descriptor::{QDesc, QueueKind};
pub use engine::Engine;
pub use error::{Capacity, Error, IO_ERR_NO, Result};
pub use sga::{IoBuf, SgArray, SgElem};
pub use socket2::{Domain, Protocol, Type};
pub use tracker::{Accept, Accepted, Completion, OpKind, QToken, Submission};
pub use wait::WaitAll;

/// Maximum number of unretired operations on one descriptor.
pub const MAX_QUEUE_DEPTH: usize = 40;

/// Maximum number of entries in one scatter-gather array.
pub const MAX_SGARRAY_SIZE: usize = 10;
