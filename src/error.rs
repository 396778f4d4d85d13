use std::fmt;
use std::io;

use thiserror::Error;

use crate::descriptor::QDesc;

/// Status code reserved for I/O failures that have no more specific kind.
pub const IO_ERR_NO: i32 = -9;

/// Which contract limit a request ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// More than [`MAX_SGARRAY_SIZE`](crate::MAX_SGARRAY_SIZE) scatter-gather entries.
    SgEntries,
    /// An entry declares more bytes than its buffer holds.
    EntryLength,
    /// More than [`MAX_QUEUE_DEPTH`](crate::MAX_QUEUE_DEPTH) unretired operations on one descriptor.
    QueueDepth,
    /// The descriptor table is full.
    Descriptors,
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capacity::SgEntries => "too many scatter-gather entries",
            Capacity::EntryLength => "entry length exceeds its buffer",
            Capacity::QueueDepth => "too many pending operations on descriptor",
            Capacity::Descriptors => "descriptor table full",
        };

        f.write_str(name)
    }
}

/// Errors returned by the queue engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown or closed queue descriptor, or a descriptor of the wrong kind.
    #[error("invalid queue descriptor {0}")]
    InvalidDescriptor(QDesc),
    /// Unknown or already retired token.
    #[error("invalid queue token {0}")]
    InvalidToken(u64),
    /// A contract limit was exceeded.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(Capacity),
    /// The descriptor was closed while the operation was still pending.
    #[error("queue descriptor {0} closed")]
    AlreadyClosed(QDesc),
    /// Failure reported by the network or file backend.
    #[error("backend failure: {0}")]
    Backend(#[from] io::Error),
    /// Failure with no more specific kind.
    #[error("I/O failure")]
    GenericIo,
}

impl Error {
    /// Negative status code for callers that still speak the integer interface.
    pub fn code(&self) -> i32 {
        match self {
            Error::InvalidDescriptor(_) => -libc::ENXIO,
            Error::InvalidToken(_) => -libc::EINVAL,
            Error::CapacityExceeded(_) => -libc::ENOBUFS,
            Error::AlreadyClosed(_) => -libc::ECANCELED,
            Error::Backend(err) => match err.raw_os_error() {
                Some(errno) if errno > 0 => -errno,
                _ => IO_ERR_NO,
            },
            Error::GenericIo => IO_ERR_NO,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
