//! Queue descriptor table.
//!
//! Every live queue, network or file, owns one slot. The slot holds the
//! backend (and through it the native handle), one FIFO of pending tokens
//! per operation kind and a count of unretired operations. Merged descriptors sit
//! in the same namespace but only list their members.
//!
//! Each allocation is stamped with a fresh epoch. A reused numeric id gets a
//! new epoch, so records left behind by the previous owner of that id can
//! never be mistaken for the new one's.

use crate::backend::Backend;
use crate::error::{Capacity, Error, Result};
use crate::tracker::{OpKind, QToken};
use crate::utils::slab::Slab;

use std::collections::VecDeque;
use std::fmt;

/// Queue descriptor: identifies a network, file or merged queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QDesc(u32);

impl QDesc {
    /// `DescriptorTable` caps its limit at `u32::MAX`, so the cast is lossless.
    pub(crate) fn from_index(index: usize) -> Self {
        debug_assert!(u32::try_from(index).is_ok());
        Self(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    /// Raw numeric value.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for QDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of resource behind a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Network,
    File,
    Merged,
}

/// A descriptor backed by a native handle.
pub(crate) struct Descriptor {
    pub(crate) backend: Backend,
    /// Operations registered and not yet retired by a wait call.
    pub(crate) unretired: usize,
    pushes: VecDeque<QToken>,
    pops: VecDeque<QToken>,
    accepts: VecDeque<QToken>,
}

impl Descriptor {
    pub(crate) fn new(backend: Backend) -> Self {
        Self {
            backend,
            unretired: 0,
            pushes: VecDeque::new(),
            pops: VecDeque::new(),
            accepts: VecDeque::new(),
        }
    }

    /// Submission-ordered tokens still waiting for the backend in one direction.
    pub(crate) fn queue(&self, kind: OpKind) -> &VecDeque<QToken> {
        match kind {
            OpKind::Push => &self.pushes,
            OpKind::Pop => &self.pops,
            OpKind::Accept => &self.accepts,
        }
    }

    pub(crate) fn queue_mut(&mut self, kind: OpKind) -> &mut VecDeque<QToken> {
        match kind {
            OpKind::Push => &mut self.pushes,
            OpKind::Pop => &mut self.pops,
            OpKind::Accept => &mut self.accepts,
        }
    }

    pub(crate) fn has_queued(&self) -> bool {
        !self.pushes.is_empty() || !self.pops.is_empty() || !self.accepts.is_empty()
    }

    /// Every queued token: pushes, then pops, then accepts.
    pub(crate) fn queued(&self) -> impl Iterator<Item = QToken> + '_ {
        self.pushes
            .iter()
            .chain(self.pops.iter())
            .chain(self.accepts.iter())
            .copied()
    }
}

/// A member reference held by a merged descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Member {
    pub(crate) qd: QDesc,
    pub(crate) epoch: u64,
}

pub(crate) enum Entry {
    Queue(Descriptor),
    Merged(Vec<Member>),
}

pub(crate) struct Slot {
    pub(crate) epoch: u64,
    pub(crate) entry: Entry,
}

impl Slot {
    pub(crate) fn kind(&self) -> QueueKind {
        match &self.entry {
            Entry::Queue(descriptor) => descriptor.backend.kind(),
            Entry::Merged(_) => QueueKind::Merged,
        }
    }
}

pub(crate) struct DescriptorTable {
    slots: Slab<Slot>,
    next_epoch: u64,
    limit: usize,
}

impl DescriptorTable {
    pub(crate) fn new(limit: usize) -> Self {
        // Ids are u32; live slots never index past the limit.
        let limit = limit.min(u32::MAX as usize);

        Self {
            slots: Slab::new(limit.min(64)),
            next_epoch: 1,
            limit,
        }
    }

    pub(crate) fn check_room(&self) -> Result<()> {
        if self.slots.len() >= self.limit {
            return Err(Error::CapacityExceeded(Capacity::Descriptors));
        }

        Ok(())
    }

    /// Allocates a slot for `entry`, handing it back when the table is full.
    pub(crate) fn insert(&mut self, entry: Entry) -> std::result::Result<(QDesc, u64), Entry> {
        if self.check_room().is_err() {
            return Err(entry);
        }

        let epoch = self.next_epoch;
        self.next_epoch += 1;

        let index = self.slots.insert(Slot { epoch, entry });

        Ok((QDesc::from_index(index), epoch))
    }

    pub(crate) fn slot(&self, qd: QDesc) -> Result<&Slot> {
        self.slots
            .get(qd.index())
            .ok_or(Error::InvalidDescriptor(qd))
    }

    /// Returns the backed descriptor at `qd`; merged descriptors are rejected.
    pub(crate) fn queue(&self, qd: QDesc) -> Result<&Descriptor> {
        match &self.slot(qd)?.entry {
            Entry::Queue(descriptor) => Ok(descriptor),
            Entry::Merged(_) => Err(Error::InvalidDescriptor(qd)),
        }
    }

    pub(crate) fn queue_mut(&mut self, qd: QDesc) -> Result<&mut Descriptor> {
        match self.slots.get_mut(qd.index()).map(|slot| &mut slot.entry) {
            Some(Entry::Queue(descriptor)) => Ok(descriptor),
            _ => Err(Error::InvalidDescriptor(qd)),
        }
    }

    /// Like [`queue_mut`](Self::queue_mut), but only if the slot still belongs
    /// to the allocation stamped `epoch`.
    pub(crate) fn queue_at_epoch(&mut self, qd: QDesc, epoch: u64) -> Option<&mut Descriptor> {
        match self.slots.get_mut(qd.index()) {
            Some(Slot {
                epoch: current,
                entry: Entry::Queue(descriptor),
            }) if *current == epoch => Some(descriptor),
            _ => None,
        }
    }

    pub(crate) fn remove(&mut self, qd: QDesc) -> Result<Slot> {
        self.slots
            .remove(qd.index())
            .ok_or(Error::InvalidDescriptor(qd))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (QDesc, &Slot)> {
        self.slots
            .iter()
            .map(|(index, slot)| (QDesc::from_index(index), slot))
    }

    pub(crate) fn drain(&mut self) -> Vec<Slot> {
        self.slots.drain()
    }
}
