//! Execution strategies that run every batch of a workload and reduce the partial results.

mod message_passing;
mod sequential;
mod state;
mod task_graph;

use std::any::Any;
use std::num::NonZero;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::time::Duration;

use derive_more::Display;
pub use message_passing::*;
pub use sequential::*;
use serde::{Deserialize, Serialize};
pub use state::*;
pub use task_graph::*;

use crate::{Error, ExecutionUnit, PartialResult, Result, Workload};

/// A way of executing all batches of a workload and reducing their partial results.
///
/// # Contract
///
/// Every implementation returns the same reduced result for the same workload, regardless of
/// worker count. The elapsed time covers only the parallel region of the run; setting up
/// workers and loading shared context happen before the clock starts.
pub trait ExecutionBackend {
    /// Identifies the strategy.
    fn kind(&self) -> BackendKind;

    /// Executes every batch of `workload` on `workers` workers and returns the reduced result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerFailure`][crate::Error::WorkerFailure] if a worker crashes or
    /// cannot be reached and [`Error::MissingInput`][crate::Error::MissingInput] if the
    /// workload refers to a file that does not exist. Errors from partitioning the workload are
    /// propagated as-is.
    fn run<W: Workload>(
        &self,
        workload: &W,
        workers: NonZero<usize>,
    ) -> Result<RunOutcome<W::Output>>;
}

/// Selects one of the execution strategies.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(rename_all = "kebab-case")]
#[expect(
    clippy::exhaustive_enums,
    reason = "the set of execution strategies is closed and callers match on it"
)]
pub enum BackendKind {
    /// Folds every batch in order on the calling thread.
    #[serde(alias = "seq")]
    Sequential,

    /// A fixed world of ranks that exchange point-to-point messages.
    #[serde(alias = "mpi")]
    MessagePassing,

    /// A worker pool with one dynamically dispatched task per batch.
    #[serde(alias = "dask")]
    TaskGraph,
}

impl BackendKind {
    /// Every strategy, with the sequential baseline first.
    pub const ALL: [Self; 3] = [Self::Sequential, Self::MessagePassing, Self::TaskGraph];

    /// Runs `workload` with the selected strategy.
    ///
    /// # Errors
    ///
    /// See [`ExecutionBackend::run`].
    pub fn run<W: Workload>(
        self,
        workload: &W,
        workers: NonZero<usize>,
    ) -> Result<RunOutcome<W::Output>> {
        match self {
            Self::Sequential => Sequential.run(workload, workers),
            Self::MessagePassing => MessagePassing.run(workload, workers),
            Self::TaskGraph => TaskGraph.run(workload, workers),
        }
    }

    /// The worker count this strategy actually uses when `requested` workers are asked for.
    ///
    /// The sequential strategy always uses exactly one.
    #[must_use]
    pub fn effective_workers(self, requested: NonZero<usize>) -> NonZero<usize> {
        match self {
            Self::Sequential => NonZero::<usize>::MIN,
            Self::MessagePassing | Self::TaskGraph => requested,
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "sequential" | "seq" => Ok(Self::Sequential),
            "message-passing" | "messagepassing" | "mpi" => Ok(Self::MessagePassing),
            "task-graph" | "taskgraph" | "dask" => Ok(Self::TaskGraph),
            _ => Err(format!(
                "unknown backend '{s}', expected one of: sequential, message-passing, task-graph"
            )),
        }
    }
}

/// The reduced result of one run together with the time its parallel region took.
#[derive(Clone, Debug, PartialEq)]
pub struct RunOutcome<R> {
    result: R,
    elapsed: Duration,
}

impl<R> RunOutcome<R> {
    pub(crate) fn new(result: R, elapsed: Duration) -> Self {
        Self { result, elapsed }
    }

    /// The reduced result.
    #[must_use]
    pub fn result(&self) -> &R {
        &self.result
    }

    /// Consumes the outcome, returning the reduced result.
    #[must_use]
    pub fn into_result(self) -> R {
        self.result
    }

    /// Wall-clock time of the timed region.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Wall-clock time of the timed region, in seconds.
    #[must_use]
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

/// Folds `batches` in order, starting from the identity.
pub(crate) fn fold_batches<W: Workload>(
    context: &W::Context,
    batches: &[W::Batch],
) -> Result<W::Output> {
    let mut result = W::Output::identity();

    for batch in batches {
        result = result.merge(W::process(context, batch)?);
    }

    Ok(result)
}

/// Like [`fold_batches`] but turns a panic into [`Error::WorkerFailure`] attributed to `unit`.
pub(crate) fn fold_batches_trapped<W: Workload>(
    unit: ExecutionUnit,
    context: &W::Context,
    batches: &[W::Batch],
) -> Result<W::Output> {
    panic::catch_unwind(AssertUnwindSafe(|| fold_batches::<W>(context, batches)))
        .unwrap_or_else(|payload| {
            Err(Error::worker_failure(
                unit,
                format!("panicked: {}", panic_message(&*payload)),
            ))
        })
}

/// Extracts a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
