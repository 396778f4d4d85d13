//! Scatter-gather payload descriptions.
//!
//! An [`SgArray`] is an ordered list of [`SgElem`] entries, each naming a
//! shared buffer and the number of bytes of it that take part in the
//! transfer. Buffers are never copied or taken over by the engine: an
//! [`IoBuf`] is a reference-counted view, so the caller keeps its own handle
//! and reads the received bytes through it once the operation completes.
//!
//! # Example
//!
//! ```
//! use ioqueue::{IoBuf, SgArray, SgElem};
//!
//! let header = IoBuf::from(&b"len:5\n"[..]);
//! let body = IoBuf::from(&b"hello world"[..]);
//!
//! let mut sga = SgArray::new();
//! sga.push(SgElem::whole(header));
//! sga.push(SgElem::new(body, 5));
//!
//! assert_eq!(sga.num_bufs(), 2);
//! assert_eq!(sga.total_len(), 11);
//! assert_eq!(sga.gather(sga.total_len()), b"len:5\nhello");
//! ```

use crate::MAX_SGARRAY_SIZE;
use crate::error::{Capacity, Error, Result};

use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;

/// A shared, fixed-size byte buffer referenced by scatter-gather entries.
///
/// Cloning an `IoBuf` clones the handle, not the bytes. While an operation
/// referencing the buffer is pending the caller must leave its contents
/// alone; the engine only touches the bytes when it can lock the buffer, and
/// defers the transfer otherwise.
#[derive(Clone, Default)]
pub struct IoBuf(Arc<Mutex<Vec<u8>>>);

impl IoBuf {
    /// Allocates a zero-filled buffer of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self::from(vec![0u8; len])
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the buffer contents out.
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.lock().clone()
    }

    /// Overwrites the start of the buffer with `data`, returning the number
    /// of bytes copied.
    pub fn copy_from_slice(&self, data: &[u8]) -> usize {
        let mut bytes = self.0.lock();
        let n = data.len().min(bytes.len());
        bytes[..n].copy_from_slice(&data[..n]);
        n
    }

    /// Returns whether both handles refer to the same buffer.
    pub fn ptr_eq(&self, other: &IoBuf) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<Vec<u8>> for IoBuf {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Arc::new(Mutex::new(bytes)))
    }
}

impl From<&[u8]> for IoBuf {
    fn from(bytes: &[u8]) -> Self {
        Self::from(bytes.to_vec())
    }
}

impl fmt::Debug for IoBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoBuf").field("len", &self.len()).finish()
    }
}

/// One `(buffer, length)` slot of a scatter-gather array.
///
/// The declared length is authoritative: only the first `len` bytes of the
/// buffer are sent by a push or filled by a pop.
#[derive(Clone, Debug)]
pub struct SgElem {
    pub buf: IoBuf,
    pub len: usize,
}

impl SgElem {
    pub fn new(buf: IoBuf, len: usize) -> Self {
        Self { buf, len }
    }

    /// Uses the entire buffer.
    pub fn whole(buf: IoBuf) -> Self {
        let len = buf.len();
        Self { buf, len }
    }
}

/// Ordered scatter-gather array describing one I/O payload.
///
/// The array itself may hold any number of entries; submitting one with more
/// than [`MAX_SGARRAY_SIZE`] entries is rejected before it reaches a backend.
#[derive(Clone, Debug, Default)]
pub struct SgArray {
    elems: Vec<SgElem>,
}

impl SgArray {
    pub fn new() -> Self {
        Self { elems: Vec::new() }
    }

    /// Single-entry array holding a copy of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut sga = Self::new();
        sga.push(SgElem::whole(IoBuf::from(bytes)));
        sga
    }

    /// Array of freshly zeroed buffers, one per requested length.
    pub fn zeroed(lens: &[usize]) -> Self {
        let elems = lens
            .iter()
            .map(|&len| SgElem::whole(IoBuf::zeroed(len)))
            .collect();

        Self { elems }
    }

    pub fn push(&mut self, elem: SgElem) {
        self.elems.push(elem);
    }

    /// Number of entries.
    pub fn num_bufs(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Sum of the declared entry lengths.
    pub fn total_len(&self) -> usize {
        self.elems.iter().map(|elem| elem.len).sum()
    }

    pub fn elems(&self) -> &[SgElem] {
        &self.elems
    }

    /// Concatenates up to `n` bytes across the entries, in array order.
    pub fn gather(&self, n: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(n.min(self.total_len()));
        let mut remaining = n;

        for elem in &self.elems {
            if remaining == 0 {
                break;
            }

            let bytes = elem.buf.0.lock();
            let take = elem.len.min(bytes.len()).min(remaining);
            out.extend_from_slice(&bytes[..take]);
            remaining -= take;
        }

        out
    }

    /// Checks the array against the contract limits.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.elems.len() > MAX_SGARRAY_SIZE {
            return Err(Error::CapacityExceeded(Capacity::SgEntries));
        }

        if self.elems.iter().any(|elem| elem.len > elem.buf.len()) {
            return Err(Error::CapacityExceeded(Capacity::EntryLength));
        }

        Ok(())
    }

    /// Locks every referenced buffer and builds the iovec list, skipping the
    /// first `skip` payload bytes.
    ///
    /// Returns `None` when a buffer is currently held elsewhere. A buffer
    /// referenced by several entries is locked once.
    pub(crate) fn try_lock(&self, skip: usize) -> Option<SgLock<'_>> {
        let mut guards: Vec<MutexGuard<'_, Vec<u8>>> = Vec::with_capacity(self.elems.len());
        let mut owners: Vec<*const Mutex<Vec<u8>>> = Vec::with_capacity(self.elems.len());
        let mut spans: Vec<(*mut u8, usize)> = Vec::with_capacity(self.elems.len());

        for elem in &self.elems {
            let owner = Arc::as_ptr(&elem.buf.0);
            let slot = match owners.iter().position(|known| *known == owner) {
                Some(slot) => slot,
                None => {
                    guards.push(elem.buf.0.try_lock()?);
                    owners.push(owner);
                    guards.len() - 1
                }
            };

            let bytes = &mut guards[slot];
            spans.push((bytes.as_mut_ptr(), elem.len.min(bytes.len())));
        }

        let mut skip = skip;
        let mut iov = Vec::with_capacity(spans.len());

        for (base, len) in spans {
            if skip >= len {
                skip -= len;
                continue;
            }

            iov.push(libc::iovec {
                // Stays inside the locked buffer: skip < len <= buffer length.
                iov_base: unsafe { base.add(skip) } as *mut libc::c_void,
                iov_len: len - skip,
            });
            skip = 0;
        }

        Some(SgLock {
            _guards: guards,
            iov,
        })
    }
}

impl From<Vec<SgElem>> for SgArray {
    fn from(elems: Vec<SgElem>) -> Self {
        Self { elems }
    }
}

/// Buffers of an [`SgArray`] held locked for the duration of one transfer.
pub(crate) struct SgLock<'a> {
    _guards: Vec<MutexGuard<'a, Vec<u8>>>,
    iov: Vec<libc::iovec>,
}

impl SgLock<'_> {
    pub(crate) fn iov(&self) -> &[libc::iovec] {
        &self.iov
    }

    /// Bytes still covered by the iovec list.
    pub(crate) fn remaining(&self) -> usize {
        self.iov.iter().map(|iov| iov.iov_len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_len_uses_declared_lengths() {
        let buf = IoBuf::zeroed(64);
        let sga = SgArray::from(vec![SgElem::new(buf.clone(), 10), SgElem::new(buf, 4)]);

        assert_eq!(sga.total_len(), 14);
    }

    #[test]
    fn test_validate_rejects_eleven_entries() {
        let sga = SgArray::zeroed(&[1; MAX_SGARRAY_SIZE + 1]);

        assert!(matches!(
            sga.validate(),
            Err(Error::CapacityExceeded(Capacity::SgEntries))
        ));
        assert!(SgArray::zeroed(&[1; MAX_SGARRAY_SIZE]).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_overlong_entry() {
        let sga = SgArray::from(vec![SgElem::new(IoBuf::zeroed(4), 5)]);

        assert!(matches!(
            sga.validate(),
            Err(Error::CapacityExceeded(Capacity::EntryLength))
        ));
    }

    #[test]
    fn test_try_lock_skips_consumed_bytes() {
        let sga = SgArray::zeroed(&[3, 4, 5]);

        let lock = sga.try_lock(0).unwrap();
        assert_eq!(lock.iov().len(), 3);
        assert_eq!(lock.remaining(), 12);
        drop(lock);

        let lock = sga.try_lock(5).unwrap();
        assert_eq!(lock.iov().len(), 2);
        assert_eq!(lock.iov()[0].iov_len, 2);
        assert_eq!(lock.remaining(), 7);
        drop(lock);

        let lock = sga.try_lock(12).unwrap();
        assert!(lock.iov().is_empty());
    }

    #[test]
    fn test_try_lock_shared_buffer_locks_once() {
        let buf = IoBuf::zeroed(8);
        let sga = SgArray::from(vec![SgElem::new(buf.clone(), 8), SgElem::new(buf, 8)]);

        let lock = sga.try_lock(0).expect("same buffer twice must not deadlock");
        assert_eq!(lock.iov().len(), 2);
    }

    #[test]
    fn test_try_lock_yields_to_caller_holding_buffer() {
        let buf = IoBuf::zeroed(8);
        let sga = SgArray::from(vec![SgElem::whole(buf.clone())]);

        let held = buf.0.lock();
        assert!(sga.try_lock(0).is_none());
        drop(held);
        assert!(sga.try_lock(0).is_some());
    }

    #[test]
    fn test_gather_stops_at_n() {
        let mut sga = SgArray::new();
        sga.push(SgElem::whole(IoBuf::from(&b"abc"[..])));
        sga.push(SgElem::new(IoBuf::from(&b"defgh"[..]), 2));

        assert_eq!(sga.gather(4), b"abcd");
        assert_eq!(sga.gather(100), b"abcde");
    }
}
