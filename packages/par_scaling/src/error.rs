use std::io;
use std::path::PathBuf;

use derive_more::Display;
use thiserror::Error;

/// Errors that can occur when preparing, partitioning or executing a workload.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A reference or corpus file required by the workload does not exist or cannot be read.
    #[error("missing input '{}': {source}", .path.display())]
    MissingInput {
        /// The file that could not be read.
        path: PathBuf,

        /// Why the file could not be read.
        #[source]
        source: io::Error,
    },

    /// A rank or task crashed, could not be reached or exited without delivering its result.
    #[error("{unit} failed: {reason}")]
    WorkerFailure {
        /// The unit of execution that failed.
        unit: ExecutionUnit,

        /// A human-readable description of the failure.
        reason: String,
    },

    /// The batches generated for a workload do not cover its domain exactly once.
    #[error("partition invariant violated: {problem}")]
    PartitionInvariantViolation {
        /// A human-readable description of the violation.
        problem: String,
    },

    /// The workload was constructed with an unusable domain.
    #[error("invalid workload: {problem}")]
    InvalidWorkload {
        /// A human-readable description of the problem.
        problem: String,
    },

    /// A sweep or workload configuration value is out of range or malformed.
    #[error("invalid configuration: {problem}")]
    InvalidConfig {
        /// A human-readable description of the problem.
        problem: String,
    },

    /// An I/O operation outside of workload input failed, e.g. writing a generated corpus.
    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        /// The file or directory the operation targeted.
        path: PathBuf,

        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Identifies the unit of execution named in [`Error::WorkerFailure`].
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum ExecutionUnit {
    /// A rank of the message-passing backend. Rank 0 is the coordinator.
    #[display("rank {_0}")]
    Rank(usize),

    /// A task of the task-graph backend, identified by the index of the batch it processes.
    #[display("task {_0}")]
    Task(usize),

    /// A worker thread of the task-graph backend's pool.
    #[display("worker {_0}")]
    Worker(usize),

    /// The thread that called the sequential backend.
    #[display("calling thread")]
    CallingThread,
}

/// A specialized `Result` type for workload operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn worker_failure(unit: ExecutionUnit, reason: impl Into<String>) -> Self {
        Self::WorkerFailure {
            unit,
            reason: reason.into(),
        }
    }
}
