use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, pollfd};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Readiness interest for a native handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Interest(u8);

impl Interest {
    pub(crate) const NONE: Interest = Interest(0);
    pub(crate) const READABLE: Interest = Interest(0b01);
    pub(crate) const WRITABLE: Interest = Interest(0b10);

    pub(crate) fn is_readable(self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    pub(crate) fn is_writable(self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    fn to_poll(self) -> i16 {
        let mut events = 0;
        if self.is_readable() {
            events |= POLLIN;
        }
        if self.is_writable() {
            events |= POLLOUT;
        }
        events
    }
}

impl std::ops::BitOr for Interest {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Interest(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// One entry of a `poll(2)` set.
#[repr(transparent)]
pub(crate) struct Event(pollfd);

impl Event {
    pub(crate) fn new(fd: RawFd, interest: Interest) -> Self {
        Self(pollfd {
            fd,
            events: interest.to_poll(),
            revents: 0,
        })
    }

    /// Whether the kernel reported anything for this entry. Errors and hangups
    /// count as ready so the pending operation gets to observe them.
    pub(crate) fn is_ready(&self) -> bool {
        self.0.revents & (self.0.events | POLLERR | POLLHUP | POLLNVAL) != 0
    }

    /// Blocks until at least one entry is ready or `timeout` elapses.
    ///
    /// Returns the number of ready entries; an interrupted wait reports zero.
    pub(crate) fn wait(events: &mut [Event], timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = match timeout {
            Some(duration) => duration.as_millis().min(i32::MAX as u128) as i32,
            None => -1,
        };

        let result = unsafe {
            libc::poll(
                events.as_mut_ptr() as *mut pollfd,
                events.len() as libc::nfds_t,
                timeout_ms,
            )
        };

        if result < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }

        Ok(result as usize)
    }
}

/// Self-pipe used to interrupt the driver's `poll(2)`.
pub(crate) struct WakePipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl WakePipe {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub(crate) fn new() -> io::Result<Self> {
        let mut fds = [0 as RawFd; 2];
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) } < 0 {
            return Err(io::Error::last_os_error());
        }

        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

        Ok(Self { read, write })
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub(crate) fn new() -> io::Result<Self> {
        let mut fds = [0 as RawFd; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }

        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

        for fd in [read.as_raw_fd(), write.as_raw_fd()] {
            set_flag(fd, libc::F_GETFL, libc::F_SETFL, libc::O_NONBLOCK)?;
            set_flag(fd, libc::F_GETFD, libc::F_SETFD, libc::FD_CLOEXEC)?;
        }

        Ok(Self { read, write })
    }

    pub(crate) fn read_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    /// Wakes the driver. A full pipe already guarantees a pending wake-up.
    pub(crate) fn notify(&self) {
        let byte = 1u8;
        unsafe {
            libc::write(
                self.write.as_raw_fd(),
                &byte as *const u8 as *const libc::c_void,
                1,
            );
        }
    }

    pub(crate) fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe {
                libc::read(
                    self.read.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n <= 0 {
                break;
            }
        }
    }
}

/// ORs `flag` into the file status or descriptor flags of `fd`.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn set_flag(fd: RawFd, get: libc::c_int, set: libc::c_int, flag: libc::c_int) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, get) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    if unsafe { libc::fcntl(fd, set, flags | flag) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}
