//! Result/timeout supervision for in-flight calls
//!
//! Three sources race to finish a call: the turn-complete marker (stdout
//! reader), subprocess exit (exit supervisor) and the deadline (the caller's
//! own future). Each of them must [`claim`] the pending record under the
//! client lock before acting; whoever takes it resolves the call, and the
//! others find the slot empty and do nothing.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{BridgeError, Result};
use crate::types::identifiers::CallId;
use crate::types::options::LineObserver;
use crate::types::output::CallOutput;

use super::transport::SharedState;

type Resolver = oneshot::Sender<Result<CallOutput>>;

/// The single in-flight call of a client
pub(super) struct PendingCall {
    pub(super) id: CallId,
    /// Process generation the prompt was written to; `None` until spawned
    pub(super) generation: Option<u64>,
    /// Output lines seen during this call
    pub(super) lines: Vec<String>,
    /// Set once its subprocess has exited; the exit supervisor owns resolution
    pub(super) exit_seen: bool,
    pub(super) observer: Option<LineObserver>,
    resolver: Resolver,
    started: Instant,
}

impl PendingCall {
    pub(super) fn new(
        id: CallId,
        observer: Option<LineObserver>,
    ) -> (Self, oneshot::Receiver<Result<CallOutput>>) {
        let (resolver, rx) = oneshot::channel();
        let call = Self {
            id,
            generation: None,
            lines: Vec::new(),
            exit_seen: false,
            observer,
            resolver,
            started: Instant::now(),
        };
        (call, rx)
    }

    pub(super) fn belongs_to(&self, generation: u64) -> bool {
        self.generation == Some(generation)
    }

    /// Deliver the outcome; consumes the record so it can only happen once
    pub(super) fn resolve(self, outcome: Result<CallOutput>) {
        let elapsed = self.started.elapsed();
        if self.resolver.send(outcome).is_err() {
            log::debug!("{} resolved after {elapsed:?} but its caller is gone", self.id);
        } else {
            log::trace!("{} resolved after {elapsed:?}", self.id);
        }
    }
}

/// Take the pending call out of `slot` if it satisfies `owns`
pub(super) fn claim(
    slot: &mut Option<PendingCall>,
    owns: impl FnOnce(&PendingCall) -> bool,
) -> Option<PendingCall> {
    if slot.as_ref().is_some_and(owns) {
        slot.take()
    } else {
        None
    }
}

/// Effective wait for a call: the requested timeout, capped at the ceiling
#[must_use]
pub fn effective_timeout(requested: Duration, ceiling: Duration) -> Duration {
    requested.min(ceiling)
}

pub(super) enum Outcome {
    Resolved(Result<CallOutput>),
    TimedOut,
}

/// Wait for the resolver or the deadline, whichever comes first
///
/// `claim_for_timeout` runs once the deadline passes. If it cannot claim the
/// slot, another source already won (or the subprocess has exited and is
/// draining) and its value is on its way.
pub(super) async fn await_outcome(
    mut rx: oneshot::Receiver<Result<CallOutput>>,
    deadline: Instant,
    claim_for_timeout: impl FnOnce() -> bool,
) -> Outcome {
    tokio::select! {
        biased;
        received = &mut rx => Outcome::Resolved(flatten(received)),
        () = tokio::time::sleep_until(deadline) => {
            if claim_for_timeout() {
                Outcome::TimedOut
            } else {
                Outcome::Resolved(flatten(rx.await))
            }
        }
    }
}

fn flatten(
    received: std::result::Result<Result<CallOutput>, oneshot::error::RecvError>,
) -> Result<CallOutput> {
    received.unwrap_or_else(|_| {
        Err(BridgeError::connection(
            "pending call was dropped without a result",
        ))
    })
}

/// Releases the pending slot if the caller's future goes away early
///
/// Covers spawn/write failures and dropped futures alike; a no-op once a
/// resolution source has claimed the slot.
pub(super) struct PendingGuard {
    shared: Arc<Mutex<SharedState>>,
    id: CallId,
}

impl PendingGuard {
    pub(super) const fn new(shared: Arc<Mutex<SharedState>>, id: CallId) -> Self {
        Self { shared, id }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let released = claim(&mut self.shared.lock().pending, |call| call.id == self.id);
        if released.is_some() {
            log::debug!("{} released without a resolution", self.id);
        }
    }
}
