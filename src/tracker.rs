//! Pending-operation tracking and the token space.
//!
//! Every push or pop that cannot finish on the submitting thread is recorded
//! here under a fresh non-zero [`QToken`]. The record stays until a wait call
//! retires it, whether it completed, failed, or is still pending when the
//! waiter gives up. Token values come from a monotonically increasing
//! counter, so a retired token is never handed out again.

use crate::descriptor::QDesc;
use crate::error::{Error, Result};
use crate::sga::SgArray;

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::num::NonZeroU64;

/// Token identifying one pending push or pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QToken(NonZeroU64);

impl QToken {
    /// Raw numeric value, never zero.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for QToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Push,
    Pop,
    /// Waiting for a peer on a listening network queue.
    Accept,
}

/// A connection taken off a listening queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    /// Network descriptor of the new connection.
    pub qd: QDesc,
    pub peer: Option<SocketAddr>,
}

/// Outcome of submitting a push or pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Finished on the submitting thread; the buffers already reflect it.
    Complete(usize),
    /// Registered; resolve with a wait call.
    Pending(QToken),
}

impl Submission {
    pub fn token(&self) -> Option<QToken> {
        match self {
            Submission::Complete(_) => None,
            Submission::Pending(token) => Some(*token),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Submission::Complete(_))
    }

    /// Numeric token in the integer convention: 0 means already complete.
    pub fn raw(&self) -> u64 {
        self.token().map_or(0, QToken::get)
    }
}

/// Outcome of submitting an accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    /// A peer was already waiting.
    Complete(Accepted),
    /// Registered; the completion carries the connection.
    Pending(QToken),
}

impl Accept {
    pub fn token(&self) -> Option<QToken> {
        match self {
            Accept::Complete(_) => None,
            Accept::Pending(token) => Some(*token),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Accept::Complete(_))
    }
}

/// Result of one retired operation.
#[derive(Debug)]
pub struct Completion {
    pub token: QToken,
    pub qd: QDesc,
    pub kind: OpKind,
    /// Bytes transferred, or the failure the backend reported. Zero for a
    /// successful accept.
    pub result: Result<usize>,
    /// The connection produced by a successful accept.
    pub accepted: Option<Accepted>,
}

pub(crate) enum OpStatus {
    Pending,
    Complete(usize),
    Failed(Error),
}

pub(crate) struct PendingOp {
    pub(crate) qd: QDesc,
    pub(crate) epoch: u64,
    pub(crate) kind: OpKind,
    pub(crate) sga: SgArray,
    /// Bytes pushed so far; for a pop, bytes received once complete.
    pub(crate) transferred: usize,
    pub(crate) accepted: Option<Accepted>,
    pub(crate) status: OpStatus,
}

impl PendingOp {
    pub(crate) fn is_terminal(&self) -> bool {
        !matches!(self.status, OpStatus::Pending)
    }
}

pub(crate) struct OpTracker {
    ops: HashMap<QToken, PendingOp>,
    next: NonZeroU64,
}

impl OpTracker {
    pub(crate) fn new() -> Self {
        Self {
            ops: HashMap::new(),
            next: NonZeroU64::MIN,
        }
    }

    pub(crate) fn register(
        &mut self,
        qd: QDesc,
        epoch: u64,
        kind: OpKind,
        sga: SgArray,
        transferred: usize,
    ) -> QToken {
        let token = QToken(self.next);
        self.next = self.next.saturating_add(1);

        self.ops.insert(
            token,
            PendingOp {
                qd,
                epoch,
                kind,
                sga,
                transferred,
                accepted: None,
                status: OpStatus::Pending,
            },
        );

        token
    }

    pub(crate) fn get(&self, token: QToken) -> Result<&PendingOp> {
        self.ops.get(&token).ok_or(Error::InvalidToken(token.get()))
    }

    pub(crate) fn get_mut(&mut self, token: QToken) -> Option<&mut PendingOp> {
        self.ops.get_mut(&token)
    }

    pub(crate) fn is_terminal(&self, token: QToken) -> Result<bool> {
        self.get(token).map(PendingOp::is_terminal)
    }

    /// Records the backend's verdict. Terminal records are left untouched.
    pub(crate) fn resolve(&mut self, token: QToken, outcome: std::io::Result<usize>) {
        self.settle(token, outcome.map_err(Error::Backend));
    }

    pub(crate) fn fail(&mut self, token: QToken, error: Error) {
        self.settle(token, Err(error));
    }

    /// Records the connection produced by an accept.
    pub(crate) fn resolve_accept(&mut self, token: QToken, outcome: Result<Accepted>) {
        match outcome {
            Ok(accepted) => {
                if let Some(op) = self.ops.get_mut(&token)
                    && !op.is_terminal()
                {
                    op.accepted = Some(accepted);
                }
                self.settle(token, Ok(0));
            }
            Err(err) => self.settle(token, Err(err)),
        }
    }

    fn settle(&mut self, token: QToken, outcome: Result<usize>) {
        let Some(op) = self.ops.get_mut(&token) else {
            return;
        };
        if op.is_terminal() {
            return;
        }

        op.status = match outcome {
            Ok(n) => {
                op.transferred = n;
                OpStatus::Complete(n)
            }
            Err(err) => OpStatus::Failed(err),
        };
    }

    /// Removes the record, turning it into a [`Completion`].
    pub(crate) fn retire(&mut self, token: QToken) -> Result<(PendingOp, Completion)> {
        let mut op = self
            .ops
            .remove(&token)
            .ok_or(Error::InvalidToken(token.get()))?;

        let result = match std::mem::replace(&mut op.status, OpStatus::Pending) {
            OpStatus::Complete(n) => Ok(n),
            OpStatus::Failed(err) => Err(err),
            OpStatus::Pending => Err(Error::GenericIo),
        };

        let completion = Completion {
            token,
            qd: op.qd,
            kind: op.kind,
            result,
            accepted: op.accepted.take(),
        };

        Ok((op, completion))
    }

    /// Unretired tokens registered by the allocation `(qd, epoch)`.
    pub(crate) fn tokens_for(&self, qd: QDesc, epoch: u64) -> impl Iterator<Item = QToken> + '_ {
        self.ops
            .iter()
            .filter(move |(_, op)| op.qd == qd && op.epoch == epoch)
            .map(|(token, _)| *token)
    }
}
