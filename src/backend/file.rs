//! File-backed queues.
//!
//! Files are opened through `open(2)` with the flags assembled by
//! [`OpenOptions`], always including `O_NONBLOCK`, so opening a FIFO without
//! a peer returns at once instead of stalling the caller. Regular files never
//! report `EAGAIN`, so their pushes and pops normally complete on the
//! submitting thread.

use libc::{
    O_APPEND, O_CLOEXEC, O_CREAT, O_EXCL, O_NONBLOCK, O_RDONLY, O_RDWR, O_TRUNC, O_WRONLY,
};
use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Options for [`Engine::open`](crate::Engine::open).
///
/// `mode` only matters when the call creates the file.
///
/// ```
/// use ioqueue::OpenOptions;
///
/// let options = OpenOptions::new().write(true).create(true).mode(0o600);
/// assert_eq!(options.permissions(), 0o600);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    read: bool,
    write: bool,
    append: bool,
    truncate: bool,
    create: bool,
    create_new: bool,
    custom_flags: i32,
    mode: u32,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenOptions {
    /// All options off, mode `0o644`.
    pub fn new() -> Self {
        Self {
            read: false,
            write: false,
            append: false,
            truncate: false,
            create: false,
            create_new: false,
            custom_flags: 0,
            mode: 0o644,
        }
    }

    pub fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Create the file, failing if it already exists.
    pub fn create_new(mut self, create_new: bool) -> Self {
        self.create_new = create_new;
        self
    }

    /// Extra `open(2)` flags OR-ed into the computed ones.
    pub fn custom_flags(mut self, flags: i32) -> Self {
        self.custom_flags = flags;
        self
    }

    /// Permission bits applied when the file is created.
    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn permissions(&self) -> u32 {
        self.mode
    }

    fn flags(&self) -> io::Result<i32> {
        let access = match (self.read, self.write || self.append) {
            (true, false) => O_RDONLY,
            (false, true) => O_WRONLY,
            (true, true) => O_RDWR,
            (false, false) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "file must be opened for reading or writing",
                ));
            }
        };

        let mut flags = access | O_CLOEXEC | O_NONBLOCK | self.custom_flags;
        if self.append {
            flags |= O_APPEND;
        }
        if self.truncate {
            flags |= O_TRUNC;
        }
        if self.create {
            flags |= O_CREAT;
        }
        if self.create_new {
            flags |= O_CREAT | O_EXCL;
        }

        Ok(flags)
    }
}

pub(crate) struct FileQueue {
    file_descriptor: OwnedFd,
}

impl FileQueue {
    pub(crate) fn open(path: &Path, options: &OpenOptions) -> io::Result<Self> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains null byte"))?;
        let flags = options.flags()?;

        let file_descriptor = unsafe {
            if flags & O_CREAT != 0 {
                libc::open(c_path.as_ptr(), flags, options.mode as libc::c_uint)
            } else {
                libc::open(c_path.as_ptr(), flags)
            }
        };

        if file_descriptor < 0 {
            return Err(io::Error::last_os_error());
        }

        let file_descriptor = unsafe { OwnedFd::from_raw_fd(file_descriptor) };

        Ok(Self { file_descriptor })
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.file_descriptor.as_raw_fd()
    }

    pub(crate) fn write(&self, iov: &[libc::iovec]) -> io::Result<usize> {
        let result = unsafe { libc::writev(self.raw_fd(), iov.as_ptr(), iov.len() as libc::c_int) };
        if result < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(result as usize)
    }

    pub(crate) fn read(&self, iov: &[libc::iovec]) -> io::Result<usize> {
        let result = unsafe { libc::readv(self.raw_fd(), iov.as_ptr(), iov.len() as libc::c_int) };
        if result < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(result as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_access_modes() {
        let read = OpenOptions::new().read(true).flags().unwrap();
        assert_eq!(read & libc::O_ACCMODE, O_RDONLY);
        assert_ne!(read & O_NONBLOCK, 0);

        let write = OpenOptions::new().write(true).create(true).flags().unwrap();
        assert_eq!(write & libc::O_ACCMODE, O_WRONLY);
        assert_ne!(write & O_CREAT, 0);

        let both = OpenOptions::new().read(true).append(true).flags().unwrap();
        assert_eq!(both & libc::O_ACCMODE, O_RDWR);
        assert_ne!(both & O_APPEND, 0);
    }

    #[test]
    fn test_flags_require_access() {
        let err = OpenOptions::new().create(true).flags().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_create_new_is_exclusive() {
        let flags = OpenOptions::new().write(true).create_new(true).flags().unwrap();
        assert_ne!(flags & O_EXCL, 0);
        assert_ne!(flags & O_CREAT, 0);
    }
}
