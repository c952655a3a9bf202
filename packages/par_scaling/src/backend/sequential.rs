use std::num::NonZero;
use std::time::Instant;

use tracing::debug;

use crate::backend::fold_batches_trapped;
use crate::{BackendKind, ExecutionBackend, ExecutionUnit, Result, RunOutcome, Workload};

/// Folds every batch in batch order on the calling thread.
///
/// This is the baseline that speedup is measured against. The requested worker count is ignored.
/// A panicking batch fails the run with [`Error::WorkerFailure`][crate::Error::WorkerFailure]
/// attributed to [`ExecutionUnit::CallingThread`] instead of unwinding into the caller.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[expect(clippy::exhaustive_structs, reason = "stateless strategy marker")]
pub struct Sequential;

impl ExecutionBackend for Sequential {
    fn kind(&self) -> BackendKind {
        BackendKind::Sequential
    }

    fn run<W: Workload>(
        &self,
        workload: &W,
        _workers: NonZero<usize>,
    ) -> Result<RunOutcome<W::Output>> {
        workload.check_inputs()?;

        let batches = workload.partition()?;
        let context = workload.load_context()?;

        debug!(backend = %self.kind(), batches = batches.len(), "run starting");

        let start = Instant::now();
        let result = fold_batches_trapped::<W>(ExecutionUnit::CallingThread, &context, &batches)?;

        Ok(RunOutcome::new(result, start.elapsed()))
    }
}
