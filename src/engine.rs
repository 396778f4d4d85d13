//! The engine context.
//!
//! An [`Engine`] owns the descriptor table, the operation tracker and the
//! background completion driver. Every operation goes through a reference to
//! it; there is no process-wide state. Dropping the engine (or calling
//! [`Engine::shutdown`]) stops the driver, fails whatever is still pending and
//! closes every remaining native handle.

use crate::backend::{Backend, FileQueue, NetQueue, OpenOptions};
use crate::builder::{Config, EngineBuilder};
use crate::descriptor::{Descriptor, DescriptorTable, Entry, QDesc, QueueKind};
use crate::error::{Capacity, Error, Result};
use crate::reactor::driver;
use crate::reactor::event::{Interest, WakePipe};
use crate::sga::SgArray;
use crate::tracker::{Accept, Accepted, Completion, OpKind, OpTracker, QToken, Submission};
use crate::MAX_QUEUE_DEPTH;

use parking_lot::{Condvar, Mutex};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::Poll;
use std::thread::JoinHandle;
use tracing::{debug, trace, warn};

pub(crate) struct State {
    pub(crate) table: DescriptorTable,
    pub(crate) ops: OpTracker,
}

/// A descriptor the driver has to poll, with the readiness it waits for.
pub(crate) struct Watch {
    pub(crate) qd: QDesc,
    pub(crate) epoch: u64,
    pub(crate) fd: RawFd,
    pub(crate) interest: Interest,
}

impl State {
    /// Drives the queued operations of `(qd, epoch)` as far as the backend
    /// allows, oldest first in each direction. Returns how many resolved.
    pub(crate) fn progress(&mut self, qd: QDesc, epoch: u64) -> usize {
        let State { table, ops } = self;
        let Some(descriptor) = table.queue_at_epoch(qd, epoch) else {
            return 0;
        };

        let mut resolved = 0;
        for kind in [OpKind::Push, OpKind::Pop] {
            while let Some(&token) = descriptor.queue(kind).front() {
                let Some(op) = ops.get_mut(token) else {
                    descriptor.queue_mut(kind).pop_front();
                    continue;
                };

                let Poll::Ready(outcome) =
                    descriptor
                        .backend
                        .attempt(kind, &op.sga, &mut op.transferred)
                else {
                    break;
                };

                descriptor.queue_mut(kind).pop_front();
                match &outcome {
                    Ok(n) => trace!(qd = %qd, token = %token, ?kind, bytes = n, "operation completed"),
                    Err(err) => trace!(qd = %qd, token = %token, ?kind, error = %err, "operation failed"),
                }
                ops.resolve(token, outcome);
                resolved += 1;
            }
        }

        resolved + self.progress_accepts(qd, epoch)
    }

    /// Hands connections waiting on a listener to its queued accepts.
    fn progress_accepts(&mut self, qd: QDesc, epoch: u64) -> usize {
        let mut resolved = 0;
        loop {
            let Some(descriptor) = self.table.queue_at_epoch(qd, epoch) else {
                break;
            };
            let Some(&token) = descriptor.queue(OpKind::Accept).front() else {
                break;
            };
            if self.ops.get_mut(token).is_none() {
                descriptor.queue_mut(OpKind::Accept).pop_front();
                continue;
            }
            let Some(net) = descriptor.backend.as_net() else {
                break;
            };

            let connection = match net.accept() {
                Ok(connection) => connection,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    descriptor.queue_mut(OpKind::Accept).pop_front();
                    trace!(qd = %qd, token = %token, error = %err, "accept failed");
                    self.ops.resolve_accept(token, Err(err.into()));
                    resolved += 1;
                    continue;
                }
            };
            descriptor.queue_mut(OpKind::Accept).pop_front();

            let (socket, peer) = connection;
            let outcome = self.adopt(qd, socket, peer);
            self.ops.resolve_accept(token, outcome);
            resolved += 1;
        }

        resolved
    }

    /// Gives an accepted socket its own network descriptor.
    pub(crate) fn adopt(
        &mut self,
        listener: QDesc,
        socket: Socket,
        peer: Option<SocketAddr>,
    ) -> Result<Accepted> {
        let net = NetQueue::from_socket(socket)?;
        let (qd, _) = self
            .table
            .insert(Entry::Queue(Descriptor::new(Backend::Network(net))))
            .map_err(|_| Error::CapacityExceeded(Capacity::Descriptors))?;
        debug!(listener = %listener, qd = %qd, ?peer, "accepted");

        Ok(Accepted { qd, peer })
    }

    /// Descriptors with queued operations.
    pub(crate) fn watches(&self) -> Vec<Watch> {
        self.table
            .iter()
            .filter_map(|(qd, slot)| {
                let Entry::Queue(descriptor) = &slot.entry else {
                    return None;
                };
                if !descriptor.has_queued() {
                    return None;
                }

                let mut interest = Interest::NONE;
                for kind in [OpKind::Push, OpKind::Pop, OpKind::Accept] {
                    if !descriptor.queue(kind).is_empty() {
                        interest |= Backend::interest(kind);
                    }
                }

                Some(Watch {
                    qd,
                    epoch: slot.epoch,
                    fd: descriptor.backend.raw_fd(),
                    interest,
                })
            })
            .collect()
    }

    /// Removes a terminal record and frees its place in the descriptor's
    /// pending budget.
    pub(crate) fn retire(&mut self, token: QToken) -> Result<Completion> {
        let (op, completion) = self.ops.retire(token)?;

        if let Some(descriptor) = self.table.queue_at_epoch(op.qd, op.epoch) {
            descriptor.unretired = descriptor.unretired.saturating_sub(1);
            descriptor.queue_mut(op.kind).retain(|queued| *queued != token);
        }

        Ok(completion)
    }
}

pub(crate) struct Shared {
    pub(crate) state: Mutex<State>,
    /// Signalled whenever an operation reaches a terminal state.
    pub(crate) completed: Condvar,
    pub(crate) wake: WakePipe,
    pub(crate) shutdown: AtomicBool,
    pub(crate) config: Config,
}

/// Unified queue engine for network and file I/O.
///
/// # Example
/// ```
/// use ioqueue::{Engine, OpenOptions, SgArray};
///
/// let engine = Engine::new().unwrap();
/// let path = std::env::temp_dir().join(format!("ioqueue_doc_{}", std::process::id()));
///
/// let qd = engine.creat(&path, 0o644).unwrap();
/// let written = engine.blocking_push(qd, &SgArray::from_bytes(b"hello")).unwrap();
/// assert_eq!(written, 5);
/// engine.close(qd).unwrap();
///
/// let qd = engine.open(&path, &OpenOptions::new().read(true)).unwrap();
/// let sga = SgArray::zeroed(&[5]);
/// let read = engine.blocking_pop(qd, &sga).unwrap();
/// assert_eq!(sga.gather(read), b"hello");
///
/// engine.close(qd).unwrap();
/// std::fs::remove_file(&path).unwrap();
/// ```
pub struct Engine {
    pub(crate) shared: Arc<Shared>,
    driver: Option<JoinHandle<()>>,
}

impl Engine {
    /// Creates an engine with the default configuration.
    pub fn new() -> Result<Self> {
        EngineBuilder::new().build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub(crate) fn with_config(config: Config) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                table: DescriptorTable::new(config.max_descriptors),
                ops: OpTracker::new(),
            }),
            completed: Condvar::new(),
            wake: WakePipe::new()?,
            shutdown: AtomicBool::new(false),
            config,
        });

        let driver = driver::spawn(Arc::clone(&shared))?;
        debug!(
            poll_interval = ?shared.config.poll_interval,
            max_descriptors = shared.config.max_descriptors,
            "engine started"
        );

        Ok(Self {
            shared,
            driver: Some(driver),
        })
    }

    /// Builds a backend with the engine unlocked, then files it in the table.
    fn allocate(&self, make: impl FnOnce() -> io::Result<Backend>) -> Result<QDesc> {
        self.shared.state.lock().table.check_room()?;
        let backend = make()?;

        let mut state = self.shared.state.lock();
        match state.table.insert(Entry::Queue(Descriptor::new(backend))) {
            Ok((qd, _)) => Ok(qd),
            Err(entry) => {
                // Another thread took the last slot; close the handle unlocked.
                drop(state);
                drop(entry);
                Err(Error::CapacityExceeded(Capacity::Descriptors))
            }
        }
    }

    fn with_net<T>(&self, qd: QDesc, f: impl FnOnce(&NetQueue) -> io::Result<T>) -> Result<T> {
        let state = self.shared.state.lock();
        let net = state
            .table
            .queue(qd)?
            .backend
            .as_net()
            .ok_or(Error::InvalidDescriptor(qd))?;

        Ok(f(net)?)
    }

    /// Creates a network queue over a new non-blocking socket.
    pub fn queue(&self, domain: Domain, ty: Type, protocol: Option<Protocol>) -> Result<QDesc> {
        let qd = self.allocate(|| Ok(Backend::Network(NetQueue::new(domain, ty, protocol)?)))?;
        debug!(qd = %qd, "network queue created");
        Ok(qd)
    }

    pub fn bind(&self, qd: QDesc, address: SocketAddr) -> Result<()> {
        self.with_net(qd, |net| net.bind(address))?;
        debug!(qd = %qd, %address, "bound");
        Ok(())
    }

    pub fn listen(&self, qd: QDesc, backlog: i32) -> Result<()> {
        self.with_net(qd, |net| net.listen(backlog))?;
        debug!(qd = %qd, backlog, "listening");
        Ok(())
    }

    /// Address the socket behind `qd` is bound to.
    pub fn local_addr(&self, qd: QDesc) -> Result<SocketAddr> {
        self.with_net(qd, NetQueue::local_addr)
    }

    /// Accepts one connection on the listening queue `qd` without blocking.
    ///
    /// A connection already waiting is returned as [`Accept::Complete`] with
    /// its own network descriptor. Otherwise the accept is queued and the
    /// token resolves once a peer arrives; the new descriptor is then in
    /// [`Completion::accepted`]. Closing the listener fails queued accepts
    /// with [`Error::AlreadyClosed`].
    pub fn accept(&self, qd: QDesc) -> Result<Accept> {
        let mut state = self.shared.state.lock();

        let epoch = state.table.slot(qd)?.epoch;
        let descriptor = state.table.queue_mut(qd)?;
        let Some(net) = descriptor.backend.as_net() else {
            return Err(Error::InvalidDescriptor(qd));
        };

        if descriptor.unretired >= MAX_QUEUE_DEPTH {
            return Err(Error::CapacityExceeded(Capacity::QueueDepth));
        }

        if descriptor.queue(OpKind::Accept).is_empty() {
            match net.accept() {
                Ok((socket, peer)) => return Ok(Accept::Complete(state.adopt(qd, socket, peer)?)),
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) => {}
                Err(err) => return Err(err.into()),
            }
        }

        let State { table, ops } = &mut *state;
        let descriptor = table.queue_mut(qd)?;
        let token = ops.register(qd, epoch, OpKind::Accept, SgArray::new(), 0);
        descriptor.queue_mut(OpKind::Accept).push_back(token);
        descriptor.unretired += 1;
        drop(state);

        self.shared.wake.notify();
        trace!(qd = %qd, token = %token, "accept pending");

        Ok(Accept::Pending(token))
    }

    /// Starts connecting the socket behind `qd` and returns without waiting.
    ///
    /// Pushes and pops submitted before the handshake finishes stay pending
    /// until it does; a refused connection fails them.
    pub fn connect(&self, qd: QDesc, address: SocketAddr) -> Result<()> {
        self.with_net(qd, |net| net.connect(address))?;
        debug!(qd = %qd, %address, "connecting");
        Ok(())
    }

    /// Opens a file queue.
    pub fn open(&self, path: impl AsRef<Path>, options: &OpenOptions) -> Result<QDesc> {
        let path = path.as_ref();
        let qd = self.allocate(|| Ok(Backend::File(FileQueue::open(path, options)?)))?;
        debug!(qd = %qd, path = %path.display(), "file queue opened");
        Ok(qd)
    }

    /// Creates (or truncates) a file for writing.
    pub fn creat(&self, path: impl AsRef<Path>, mode: u32) -> Result<QDesc> {
        let options = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode);

        self.open(path, &options)
    }

    /// Closes `qd` and releases its native handle.
    ///
    /// Operations still queued on it fail with [`Error::AlreadyClosed`]; their
    /// tokens remain valid until a wait call retires them. The id may be
    /// handed out again by a later allocation.
    pub fn close(&self, qd: QDesc) -> Result<()> {
        let slot = {
            let mut state = self.shared.state.lock();
            let slot = state.table.remove(qd)?;

            if let Entry::Queue(descriptor) = &slot.entry {
                for token in descriptor.queued() {
                    state.ops.fail(token, Error::AlreadyClosed(qd));
                }
            }

            slot
        };

        self.shared.completed.notify_all();
        self.shared.wake.notify();
        debug!(qd = %qd, kind = ?slot.kind(), "closed");

        drop(slot);
        Ok(())
    }

    /// Native handle behind `qd`, for use with external readiness APIs.
    pub fn qd2fd(&self, qd: QDesc) -> Result<RawFd> {
        let state = self.shared.state.lock();
        Ok(state.table.queue(qd)?.backend.raw_fd())
    }

    pub fn kind(&self, qd: QDesc) -> Result<QueueKind> {
        let state = self.shared.state.lock();
        Ok(state.table.slot(qd)?.kind())
    }

    /// Writes the bytes described by `sga` to `qd`.
    ///
    /// Returns [`Submission::Complete`] when everything went out at once,
    /// otherwise a token to wait on. The buffers must stay untouched until the
    /// token is retired.
    pub fn push(&self, qd: QDesc, sga: &SgArray) -> Result<Submission> {
        self.submit(qd, OpKind::Push, sga)
    }

    /// Reads from `qd` into the buffers of `sga`.
    ///
    /// Completes with the number of bytes received; zero means end of stream.
    pub fn pop(&self, qd: QDesc, sga: &SgArray) -> Result<Submission> {
        self.submit(qd, OpKind::Pop, sga)
    }

    fn submit(&self, qd: QDesc, kind: OpKind, sga: &SgArray) -> Result<Submission> {
        sga.validate()?;

        let mut state = self.shared.state.lock();
        let State { table, ops } = &mut *state;

        let epoch = table.slot(qd)?.epoch;
        let descriptor = table.queue_mut(qd)?;

        if descriptor.unretired >= MAX_QUEUE_DEPTH {
            return Err(Error::CapacityExceeded(Capacity::QueueDepth));
        }

        if sga.total_len() == 0 {
            return Ok(Submission::Complete(0));
        }

        let mut transferred = 0;
        if descriptor.queue(kind).is_empty()
            && let Poll::Ready(outcome) = descriptor.backend.attempt(kind, sga, &mut transferred)
        {
            let n = outcome?;
            trace!(qd = %qd, ?kind, bytes = n, "completed on submission");
            return Ok(Submission::Complete(n));
        }

        let token = ops.register(qd, epoch, kind, sga.clone(), transferred);
        descriptor.queue_mut(kind).push_back(token);
        descriptor.unretired += 1;
        drop(state);

        self.shared.wake.notify();
        trace!(qd = %qd, token = %token, ?kind, "operation pending");

        Ok(Submission::Pending(token))
    }

    /// Whether the operation behind `token` reached a terminal state.
    /// Does not retire it.
    pub fn is_complete(&self, token: QToken) -> Result<bool> {
        self.shared.state.lock().ops.is_terminal(token)
    }

    /// Stops the driver, fails pending operations and closes every descriptor.
    pub fn shutdown(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        let Some(driver) = self.driver.take() else {
            return;
        };

        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wake.notify();
        if driver.join().is_err() {
            warn!("completion driver panicked");
        }

        let slots = {
            let mut state = self.shared.state.lock();
            let State { table, ops } = &mut *state;

            for (qd, slot) in table.iter() {
                if let Entry::Queue(descriptor) = &slot.entry {
                    for token in descriptor.queued() {
                        ops.fail(token, Error::AlreadyClosed(qd));
                    }
                }
            }

            table.drain()
        };

        self.shared.completed.notify_all();
        debug!(descriptors = slots.len(), "engine shut down");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.teardown();
    }
}
