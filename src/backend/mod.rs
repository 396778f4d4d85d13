//! Backend dispatch.
//!
//! A descriptor is backed either by a socket ([`NetQueue`]) or by a file
//! ([`FileQueue`]). Both are driven the same way from the engine's side:
//! [`Backend::attempt`] tries to move an operation forward without blocking
//! and reports `Poll::Pending` when the native handle is not ready or a
//! caller currently holds one of the buffers.

pub(crate) mod file;
pub(crate) mod net;

pub use file::OpenOptions;
pub(crate) use file::FileQueue;
pub(crate) use net::NetQueue;

use crate::descriptor::QueueKind;
use crate::reactor::event::Interest;
use crate::sga::{SgArray, SgLock};
use crate::tracker::OpKind;

use std::io;
use std::os::fd::RawFd;
use std::task::Poll;

pub(crate) enum Backend {
    Network(NetQueue),
    File(FileQueue),
}

impl Backend {
    pub(crate) fn kind(&self) -> QueueKind {
        match self {
            Backend::Network(_) => QueueKind::Network,
            Backend::File(_) => QueueKind::File,
        }
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        match self {
            Backend::Network(net) => net.raw_fd(),
            Backend::File(file) => file.raw_fd(),
        }
    }

    pub(crate) fn as_net(&self) -> Option<&NetQueue> {
        match self {
            Backend::Network(net) => Some(net),
            Backend::File(_) => None,
        }
    }

    /// Readiness the driver must watch for to resume an operation of `kind`.
    pub(crate) fn interest(kind: OpKind) -> Interest {
        match kind {
            OpKind::Push => Interest::WRITABLE,
            OpKind::Pop | OpKind::Accept => Interest::READABLE,
        }
    }

    fn write(&self, lock: &SgLock<'_>) -> io::Result<usize> {
        match self {
            Backend::Network(net) => net.send(lock.iov()),
            Backend::File(file) => file.write(lock.iov()),
        }
    }

    fn read(&self, lock: &SgLock<'_>) -> io::Result<usize> {
        match self {
            Backend::Network(net) => net.recv(lock.iov()),
            Backend::File(file) => file.read(lock.iov()),
        }
    }

    /// Moves one operation forward without blocking.
    ///
    /// A push resolves once every declared byte has gone out, with
    /// `transferred` tracking progress across attempts. A pop resolves as
    /// soon as any data (or end of stream) arrives.
    pub(crate) fn attempt(
        &self,
        kind: OpKind,
        sga: &SgArray,
        transferred: &mut usize,
    ) -> Poll<io::Result<usize>> {
        loop {
            let Some(lock) = sga.try_lock(*transferred) else {
                return Poll::Pending;
            };

            let result = match kind {
                OpKind::Push => {
                    if lock.remaining() == 0 {
                        return Poll::Ready(Ok(*transferred));
                    }
                    self.write(&lock)
                }
                OpKind::Pop => self.read(&lock),
                OpKind::Accept => {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "accept moves no data",
                    )));
                }
            };

            match result {
                Ok(0) if kind == OpKind::Push => {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "write returned zero bytes",
                    )));
                }
                Ok(n) if kind == OpKind::Push => *transferred += n,
                Ok(n) => {
                    *transferred = n;
                    return Poll::Ready(Ok(n));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Poll::Pending,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Poll::Ready(Err(err)),
            }
        }
    }
}
