//! Socket-backed queues.
//!
//! Sockets are created non-blocking and nothing here waits. Transfers go
//! through `sendmsg(2)` and `recvmsg(2)` with the scatter-gather iovecs handed
//! straight to the kernel; `MSG_NOSIGNAL` keeps a push to a vanished peer from
//! raising `SIGPIPE`. `connect` only starts the handshake: until it finishes,
//! transfers report `WouldBlock` and the driver retries them once the socket
//! turns ready, surfacing a refused connection as the transfer's error.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

pub(crate) struct NetQueue {
    socket: Socket,
    /// A non-blocking connect was started and has not been confirmed yet.
    connecting: AtomicBool,
}

impl NetQueue {
    pub(crate) fn new(domain: Domain, ty: Type, protocol: Option<Protocol>) -> io::Result<Self> {
        let socket = Socket::new(domain, ty, protocol)?;
        Self::from_socket(socket)
    }

    pub(crate) fn from_socket(socket: Socket) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        socket.set_nosigpipe(true)?;

        Ok(Self {
            socket,
            connecting: AtomicBool::new(false),
        })
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    pub(crate) fn bind(&self, address: SocketAddr) -> io::Result<()> {
        self.socket.bind(&SockAddr::from(address))
    }

    pub(crate) fn listen(&self, backlog: i32) -> io::Result<()> {
        self.socket.listen(backlog)
    }

    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()?.as_socket().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Unsupported, "not an inet socket address")
        })
    }

    /// Starts connecting to `address` without waiting for the handshake.
    pub(crate) fn connect(&self, address: SocketAddr) -> io::Result<()> {
        match self.socket.connect(&SockAddr::from(address)) {
            Ok(()) => Ok(()),
            Err(err) if in_progress(&err) => {
                self.connecting.store(true, Ordering::Release);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Takes one pending connection off a listening socket.
    pub(crate) fn accept(&self) -> io::Result<(Socket, Option<SocketAddr>)> {
        let (socket, address) = self.socket.accept()?;
        Ok((socket, address.as_socket()))
    }

    /// Fails with `WouldBlock` while a started connect is still in flight,
    /// or with the connect error once it failed.
    fn established(&self) -> io::Result<()> {
        if !self.connecting.load(Ordering::Acquire) {
            return Ok(());
        }

        if let Some(err) = self.socket.take_error()? {
            self.connecting.store(false, Ordering::Release);
            return Err(err);
        }

        match self.socket.peer_addr() {
            Ok(_) => {
                self.connecting.store(false, Ordering::Release);
                Ok(())
            }
            Err(err) if err.raw_os_error() == Some(libc::ENOTCONN) => {
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            }
            Err(err) => Err(err),
        }
    }

    pub(crate) fn send(&self, iov: &[libc::iovec]) -> io::Result<usize> {
        self.established()?;

        let mut message: libc::msghdr = unsafe { mem::zeroed() };
        message.msg_iov = iov.as_ptr() as *mut libc::iovec;
        message.msg_iovlen = iov.len() as _;

        let result = unsafe { libc::sendmsg(self.raw_fd(), &message, SEND_FLAGS) };
        if result < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(result as usize)
    }

    pub(crate) fn recv(&self, iov: &[libc::iovec]) -> io::Result<usize> {
        self.established()?;

        let mut message: libc::msghdr = unsafe { mem::zeroed() };
        message.msg_iov = iov.as_ptr() as *mut libc::iovec;
        message.msg_iovlen = iov.len() as _;

        let result = unsafe { libc::recvmsg(self.raw_fd(), &mut message, 0) };
        if result < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(result as usize)
    }
}

fn in_progress(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EINPROGRESS) | Some(libc::EINTR) | Some(libc::EAGAIN)
    ) || err.kind() == io::ErrorKind::WouldBlock
}
