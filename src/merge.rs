//! Merged descriptors.
//!
//! A merged descriptor has no native handle. It names two existing
//! descriptors (either of which may itself be merged) so that one wait call
//! can span the operations of both. Push and pop on the members are
//! unaffected; push, pop and `qd2fd` on the merged descriptor itself are
//! rejected.

use crate::descriptor::{Entry, Member, QDesc};
use crate::engine::{Engine, State};
use crate::error::{Capacity, Error, Result};
use crate::tracker::QToken;

use tracing::debug;

/// Adds the unretired tokens reachable from `member` to `out`.
///
/// A member closed since the merge still contributes the tokens it left
/// behind, so their failures can be collected.
fn collect(state: &State, member: Member, out: &mut Vec<QToken>) {
    match state.table.slot(member.qd) {
        Ok(slot) if slot.epoch == member.epoch => match &slot.entry {
            Entry::Queue(_) => out.extend(state.ops.tokens_for(member.qd, member.epoch)),
            Entry::Merged(members) => {
                for nested in members {
                    collect(state, *nested, out);
                }
            }
        },
        _ => out.extend(state.ops.tokens_for(member.qd, member.epoch)),
    }
}

impl Engine {
    /// Creates a descriptor whose completion set is the union of `qd1`'s and
    /// `qd2`'s.
    pub fn merge(&self, qd1: QDesc, qd2: QDesc) -> Result<QDesc> {
        if qd1 == qd2 {
            return Err(Error::InvalidDescriptor(qd2));
        }

        let mut state = self.shared.state.lock();
        let members = [qd1, qd2]
            .into_iter()
            .map(|qd| {
                let epoch = state.table.slot(qd)?.epoch;
                Ok(Member { qd, epoch })
            })
            .collect::<Result<Vec<_>>>()?;

        let (merged, _) = state
            .table
            .insert(Entry::Merged(members))
            .map_err(|_| Error::CapacityExceeded(Capacity::Descriptors))?;
        debug!(qd = %merged, members = ?[qd1, qd2], "merged");

        Ok(merged)
    }

    /// Unretired tokens of every operation submitted on `qd` or, for a
    /// merged descriptor, on any of its members. Sorted by token value.
    ///
    /// The result is a snapshot; pass it to [`wait_any`](Self::wait_any) or
    /// [`wait_all`](Self::wait_all) to block on the whole set.
    pub fn live_tokens(&self, qd: QDesc) -> Result<Vec<QToken>> {
        let state = self.shared.state.lock();
        let epoch = state.table.slot(qd)?.epoch;

        let mut tokens = Vec::new();
        collect(&state, Member { qd, epoch }, &mut tokens);
        tokens.sort_unstable();
        tokens.dedup();

        Ok(tokens)
    }
}
