use std::collections::BTreeSet;
use std::mem;
use std::num::NonZero;
use std::slice;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, trace, warn};

use crate::backend::fold_batches_trapped;
use crate::placement::Placement;
use crate::{
    BackendKind, Error, ExecutionBackend, ExecutionUnit, Result, RunOutcome, RunState,
    RunTracker, Workload, merge_all,
};

/// Executes a workload as one task per batch on a pool of exactly `workers` threads.
///
/// Tasks are pulled from a shared queue by whichever worker is idle, so a slow batch does not
/// hold up the batches queued behind it. Each task receives its own copy of the shared context.
/// The caller submits every task and then blocks once, gathering results until all tasks have
/// completed or one has failed.
///
/// The clock runs from the first submission until the gather completes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[expect(clippy::exhaustive_structs, reason = "stateless strategy marker")]
pub struct TaskGraph;

impl ExecutionBackend for TaskGraph {
    fn kind(&self) -> BackendKind {
        BackendKind::TaskGraph
    }

    fn run<W: Workload>(
        &self,
        workload: &W,
        workers: NonZero<usize>,
    ) -> Result<RunOutcome<W::Output>> {
        let mut tracker = RunTracker::new(self.kind());

        let outcome = run_graph(workload, workers, &mut tracker);

        if let Err(error) = &outcome {
            tracker.fail(error);
        }

        outcome
    }
}

fn run_graph<W: Workload>(
    workload: &W,
    workers: NonZero<usize>,
    tracker: &mut RunTracker,
) -> Result<RunOutcome<W::Output>> {
    tracker.advance(RunState::Dispatching);

    workload.check_inputs()?;

    let batches = workload.partition()?;
    let context = workload.load_context()?;
    let task_count = batches.len();

    let pool = WorkerPool::start(workers, &Placement::current())?;
    let (done_tx, done_rx) = channel::unbounded::<TaskDone<W>>();

    let start = Instant::now();

    for (task, batch) in batches.into_iter().enumerate() {
        let context = context.clone();
        let done_tx = done_tx.clone();

        pool.submit(Box::new(move |worker| {
            trace!(task, worker, "task started");

            let outcome =
                fold_batches_trapped::<W>(ExecutionUnit::Task(task), &context, slice::from_ref(&batch));

            // If the gather already failed, nobody is listening any more.
            drop(done_tx.send(TaskDone { task, outcome }));
        }))?;
    }

    // Only in-flight tasks hold senders now, so a lost task shows up as a disconnect.
    drop(done_tx);

    tracker.advance(RunState::AwaitingResults);

    let partials = gather(&done_rx, task_count)?;

    tracker.advance(RunState::Reducing);
    let result = merge_all(partials);
    let elapsed = start.elapsed();

    tracker.advance(RunState::Done);

    Ok(RunOutcome::new(result, elapsed))
}

struct TaskDone<W: Workload> {
    task: usize,
    outcome: Result<W::Output>,
}

/// Blocks until `task_count` tasks have reported success or any one of them has failed.
fn gather<W: Workload>(done: &Receiver<TaskDone<W>>, task_count: usize) -> Result<Vec<W::Output>> {
    let mut pending: BTreeSet<usize> = (0..task_count).collect();
    let mut partials = Vec::with_capacity(task_count);

    while !pending.is_empty() {
        let Ok(TaskDone { task, outcome }) = done.recv() else {
            let missing = pending
                .first()
                .copied()
                .expect("loop only runs while tasks are pending");

            return Err(Error::worker_failure(
                ExecutionUnit::Task(missing),
                "task was lost without reporting a result",
            ));
        };

        pending.remove(&task);
        partials.push(outcome?);
    }

    Ok(partials)
}

type Job = Box<dyn FnOnce(usize) + Send + 'static>;

/// A pool of worker threads that live for one run.
///
/// When the pool is dropped, workers finish the task they are executing and abandon any tasks
/// still queued.
#[derive(Debug)]
struct WorkerPool {
    jobs: Option<Sender<Job>>,
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn start(size: NonZero<usize>, placement: &Placement) -> Result<Self> {
        let (jobs_tx, jobs_rx) = channel::unbounded::<Job>();

        let mut pool = Self {
            jobs: Some(jobs_tx),
            shutdown: Arc::new(AtomicBool::new(false)),
            workers: Vec::with_capacity(size.get()),
        };

        for worker in 0..size.get() {
            let jobs = jobs_rx.clone();
            let shutdown = Arc::clone(&pool.shutdown);

            let handle = placement
                .spawn(format!("par-scaling-worker-{worker}"), worker, move || {
                    worker_loop(worker, &jobs, &shutdown);
                })
                .map_err(|error| {
                    Error::worker_failure(
                        ExecutionUnit::Worker(worker),
                        format!("worker thread could not be started: {error}"),
                    )
                })?;

            pool.workers.push(handle);
        }

        debug!(size = size.get(), "task-graph worker pool started");

        Ok(pool)
    }

    fn submit(&self, job: Job) -> Result<()> {
        let jobs = self
            .jobs
            .as_ref()
            .expect("the job queue is only closed when the pool is dropped");

        jobs.send(job).map_err(|_| {
            Error::worker_failure(
                ExecutionUnit::Worker(0),
                "every worker exited before all tasks were submitted",
            )
        })
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Release pairs with the Acquire in worker_loop, so queued jobs are skipped.
        self.shutdown.store(true, Ordering::Release);

        // Closing the queue wakes up every idle worker.
        drop(self.jobs.take());

        for handle in mem::take(&mut self.workers) {
            if handle.join().is_err() {
                // Tasks trap panics from workload code, so this is infrastructure failure.
                warn!("task-graph worker thread panicked outside the workload");
            }
        }
    }
}

fn worker_loop(worker: usize, jobs: &Receiver<Job>, shutdown: &AtomicBool) {
    debug!(worker, "task worker started");

    while let Ok(job) = jobs.recv() {
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        job(worker);
    }

    debug!(worker, "task worker exiting");
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use new_zealand::nz;
    use testing::with_watchdog;

    use super::*;
    use crate::{PrimeCount, PrimeRange};

    #[test]
    #[cfg_attr(miri, ignore)] // Miri does not support talking to the real platform.
    fn counts_two_digit_primes() {
        with_watchdog(|| {
            let workload = PrimeRange::new(10..100, nz!(10)).unwrap();

            let outcome = TaskGraph.run(&workload, nz!(3)).unwrap();

            assert_eq!(outcome.into_result(), PrimeCount::new(21));
        });
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Miri does not support talking to the real platform.
    fn pool_executes_every_job() {
        with_watchdog(|| {
            let executed = Arc::new(AtomicUsize::new(0));
            let (done_tx, done_rx) = channel::unbounded();

            {
                let pool = WorkerPool::start(nz!(2), &Placement::current()).unwrap();

                for _ in 0..20 {
                    let executed = Arc::clone(&executed);
                    let done_tx = done_tx.clone();

                    pool.submit(Box::new(move |worker| {
                        executed.fetch_add(1, Ordering::Relaxed);
                        done_tx.send(worker).unwrap();
                    }))
                    .unwrap();
                }

                for _ in 0..20 {
                    let worker = done_rx.recv().unwrap();
                    assert!(worker < 2);
                }
            }

            assert_eq!(executed.load(Ordering::Relaxed), 20);
        });
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Miri does not support talking to the real platform.
    fn dropping_pool_with_idle_workers_returns() {
        with_watchdog(|| {
            let pool = WorkerPool::start(nz!(4), &Placement::current()).unwrap();
            drop(pool);
        });
    }
}
