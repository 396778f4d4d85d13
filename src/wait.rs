//! Blocking on pending operations.
//!
//! Waiters hold the engine lock only while scanning their token list; they
//! sleep on the completion condition variable, which releases it, so the
//! driver keeps servicing every descriptor while a thread is blocked here.
//! A token is retired by the wait call that reports it and becomes invalid
//! afterwards.

use crate::descriptor::QDesc;
use crate::engine::{Engine, State};
use crate::error::{Error, Result};
use crate::sga::SgArray;
use crate::tracker::{Accept, Accepted, Completion, QToken, Submission};

use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::trace;

/// Aggregate outcome of [`Engine::wait_all`].
#[derive(Debug)]
pub struct WaitAll {
    /// One completion per token, in the order the tokens were given.
    pub completions: Vec<Completion>,
}

impl WaitAll {
    /// Bytes transferred by the operations that succeeded.
    pub fn bytes(&self) -> usize {
        self.completions
            .iter()
            .filter_map(|completion| completion.result.as_ref().ok())
            .sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &Completion> {
        self.completions
            .iter()
            .filter(|completion| completion.result.is_err())
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn len(&self) -> usize {
        self.completions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completions.is_empty()
    }
}

/// Retires the first terminal token of `tokens`, if any.
fn take_first(state: &mut State, tokens: &[QToken]) -> Result<Option<(usize, Completion)>> {
    for (index, &token) in tokens.iter().enumerate() {
        if state.ops.is_terminal(token)? {
            let completion = state.retire(token)?;
            trace!(token = %token, index, "token retired");
            return Ok(Some((index, completion)));
        }
    }

    Ok(None)
}

impl Engine {
    /// Blocks until one of `tokens` reaches a terminal state and retires it.
    ///
    /// Returns its position in `tokens` with its completion. The other tokens
    /// stay pending. When several are ready the earliest in the list wins.
    pub fn wait_any(&self, tokens: &[QToken]) -> Result<(usize, Completion)> {
        self.wait_any_until(tokens, None)?.ok_or(Error::GenericIo)
    }

    /// Like [`wait_any`](Self::wait_any), but gives up after `timeout`.
    ///
    /// `Ok(None)` means nothing finished in time; every token is still pending.
    pub fn wait_any_timeout(
        &self,
        tokens: &[QToken],
        timeout: Duration,
    ) -> Result<Option<(usize, Completion)>> {
        self.wait_any_until(tokens, Some(Instant::now() + timeout))
    }

    fn wait_any_until(
        &self,
        tokens: &[QToken],
        deadline: Option<Instant>,
    ) -> Result<Option<(usize, Completion)>> {
        if tokens.is_empty() {
            return Err(Error::InvalidToken(0));
        }

        let mut state = self.shared.state.lock();
        loop {
            if let Some(found) = take_first(&mut state, tokens)? {
                return Ok(Some(found));
            }

            match deadline {
                None => self.shared.completed.wait(&mut state),
                Some(deadline) if Instant::now() >= deadline => return Ok(None),
                Some(deadline) => {
                    self.shared.completed.wait_until(&mut state, deadline);
                }
            }
        }
    }

    /// Blocks until every token in `tokens` is terminal, then retires them all.
    ///
    /// Nothing is retired if any token is unknown or listed twice. Failed
    /// operations are reported alongside the successful ones.
    pub fn wait_all(&self, tokens: &[QToken]) -> Result<WaitAll> {
        let mut seen = HashSet::with_capacity(tokens.len());
        for token in tokens {
            if !seen.insert(*token) {
                return Err(Error::InvalidToken(token.get()));
            }
        }

        let mut state = self.shared.state.lock();
        loop {
            let mut done = true;
            for &token in tokens {
                done &= state.ops.is_terminal(token)?;
            }
            if done {
                break;
            }

            self.shared.completed.wait(&mut state);
        }

        let completions = tokens
            .iter()
            .map(|&token| state.retire(token))
            .collect::<Result<Vec<_>>>()?;
        trace!(count = completions.len(), "tokens retired");

        Ok(WaitAll { completions })
    }

    /// [`push`](Self::push) followed by a wait on its token.
    pub fn blocking_push(&self, qd: QDesc, sga: &SgArray) -> Result<usize> {
        let submission = self.push(qd, sga)?;
        self.finish(submission)
    }

    /// [`pop`](Self::pop) followed by a wait on its token.
    pub fn blocking_pop(&self, qd: QDesc, sga: &SgArray) -> Result<usize> {
        let submission = self.pop(qd, sga)?;
        self.finish(submission)
    }

    /// [`accept`](Self::accept), then wait until a peer arrives.
    pub fn blocking_accept(&self, qd: QDesc) -> Result<Accepted> {
        match self.accept(qd)? {
            Accept::Complete(accepted) => Ok(accepted),
            Accept::Pending(token) => {
                let (_, completion) = self.wait_any(&[token])?;
                completion.result?;
                completion.accepted.ok_or(Error::GenericIo)
            }
        }
    }

    fn finish(&self, submission: Submission) -> Result<usize> {
        match submission {
            Submission::Complete(n) => Ok(n),
            Submission::Pending(token) => self.wait_any(&[token])?.1.result,
        }
    }
}
