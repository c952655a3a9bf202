use derive_more::Display;
use tracing::{debug, warn};

use crate::{BackendKind, Error};

/// The lifecycle of one run of a parallel backend.
///
/// ```text
/// Idle -> Dispatching -> AwaitingResults -> Reducing -> Done
///             |                 |
///             +----> Failed <---+
/// ```
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum RunState {
    /// Nothing has happened yet.
    Idle,

    /// Batches are being computed and handed to workers.
    Dispatching,

    /// Every worker has its batches; waiting for partial results.
    AwaitingResults,

    /// All partial results arrived and are being merged.
    Reducing,

    /// The run produced a result.
    Done,

    /// The run failed. Failed runs are never retried.
    Failed,
}

impl RunState {
    /// Whether a run in this state may move to `next`.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Dispatching)
                | (Self::Dispatching, Self::AwaitingResults)
                | (Self::AwaitingResults, Self::Reducing)
                | (Self::Reducing, Self::Done)
                | (Self::Dispatching | Self::AwaitingResults, Self::Failed)
        )
    }

    /// Whether no further transitions are possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Walks one run through [`RunState`], logging every transition.
#[derive(Debug)]
pub(crate) struct RunTracker {
    backend: BackendKind,
    state: RunState,
}

impl RunTracker {
    pub(crate) fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            state: RunState::Idle,
        }
    }

    #[cfg_attr(test, mutants::skip)] // Only observable via logs and the assertion.
    pub(crate) fn advance(&mut self, next: RunState) {
        assert!(
            self.state.can_advance_to(next),
            "{} run cannot move from {} to {next}",
            self.backend,
            self.state
        );

        debug!(backend = %self.backend, from = %self.state, to = %next, "run state changed");
        self.state = next;
    }

    /// Moves the run to [`RunState::Failed`] if its current state allows it.
    pub(crate) fn fail(&mut self, error: &Error) {
        warn!(backend = %self.backend, state = %self.state, %error, "run failed");

        // Failures before any dispatch happened still pass through Dispatching.
        if self.state == RunState::Idle {
            self.advance(RunState::Dispatching);
        }

        if self.state.can_advance_to(RunState::Failed) {
            self.advance(RunState::Failed);
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> RunState {
        self.state
    }
}
