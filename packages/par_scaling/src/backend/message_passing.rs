use std::collections::BTreeSet;
use std::mem;
use std::num::NonZero;
use std::sync::{Arc, mpsc};
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::backend::fold_batches_trapped;
use crate::placement::Placement;
use crate::{
    BackendKind, Error, ExecutionBackend, ExecutionUnit, Result, RunOutcome, RunState,
    RunTracker, Workload, assign_round_robin, merge_all,
};

/// Executes a workload on a fixed world of ranks that communicate only through
/// point-to-point messages.
///
/// Rank 0 is the coordinator and runs on the calling thread. Every other rank is a thread of its
/// own, started for the duration of one run and pinned to a processor.
///
/// 1. The coordinator partitions the workload, assigns batches to ranks round-robin and loads
///    the shared context once.
/// 2. Each other rank receives its batches and a copy of the context in a single message.
/// 3. All ranks meet at a start gate. The clock starts once everyone has arrived.
/// 4. Each rank folds its own batches without further communication.
/// 5. Each other rank sends its partial result to the coordinator, which receives exactly one
///    reply per rank in whatever order they arrive and merges them with its own.
///
/// A rank that exits without replying fails the whole run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[expect(clippy::exhaustive_structs, reason = "stateless strategy marker")]
pub struct MessagePassing;

impl ExecutionBackend for MessagePassing {
    fn kind(&self) -> BackendKind {
        BackendKind::MessagePassing
    }

    fn run<W: Workload>(
        &self,
        workload: &W,
        workers: NonZero<usize>,
    ) -> Result<RunOutcome<W::Output>> {
        let mut tracker = RunTracker::new(self.kind());

        let outcome = run_world(workload, workers, &mut tracker);

        if let Err(error) = &outcome {
            tracker.fail(error);
        }

        outcome
    }
}

fn run_world<W: Workload>(
    workload: &W,
    size: NonZero<usize>,
    tracker: &mut RunTracker,
) -> Result<RunOutcome<W::Output>> {
    tracker.advance(RunState::Dispatching);

    workload.check_inputs()?;

    let batches = workload.partition()?;
    let context = workload.load_context()?;

    let mut slots = assign_round_robin(batches, size).into_slots().into_iter();
    let own_batches = slots
        .next()
        .expect("an assignment always has a slot for the coordinator");

    let mut world = World::<W>::spawn(size, &Placement::current())?;
    world.dispatch(slots, &context)?;

    tracker.advance(RunState::AwaitingResults);

    world.start()?;
    let start = Instant::now();

    let own = fold_batches_trapped::<W>(ExecutionUnit::Rank(0), &context, &own_batches)?;
    let partials = world.gather(own)?;

    tracker.advance(RunState::Reducing);
    let result = merge_all(partials);
    let elapsed = start.elapsed();

    tracker.advance(RunState::Done);

    Ok(RunOutcome::new(result, elapsed))
}

/// The single message the coordinator sends to each other rank.
struct Dispatch<W: Workload> {
    batches: Vec<W::Batch>,
    context: W::Context,
}

/// The single message each other rank sends back to the coordinator.
struct Reply<W: Workload> {
    rank: usize,
    outcome: Result<W::Output>,
}

/// The ranks of one run, as seen from the coordinator.
///
/// Dropping the world releases every rank that has not started yet and joins all rank threads.
struct World<W: Workload> {
    /// Indexed by rank minus one. Drained by `dispatch()`.
    dispatch: Vec<oneshot::Sender<Dispatch<W>>>,
    replies: mpsc::Receiver<Reply<W>>,
    gate: Arc<StartGate>,
    ranks: Vec<JoinHandle<()>>,
}

impl<W: Workload> World<W> {
    fn spawn(size: NonZero<usize>, placement: &Placement) -> Result<Self> {
        let other_ranks = size.get().saturating_sub(1);
        let (reply_tx, replies) = mpsc::channel();

        let mut world = Self {
            dispatch: Vec::with_capacity(other_ranks),
            replies,
            gate: Arc::new(StartGate::new(size)),
            ranks: Vec::with_capacity(other_ranks),
        };

        for rank in 1..size.get() {
            let (dispatch_tx, dispatch_rx) = oneshot::channel();
            let gate = Arc::clone(&world.gate);
            let reply_tx = reply_tx.clone();

            let handle = placement
                .spawn(format!("par-scaling-rank-{rank}"), rank, move || {
                    rank_main(rank, dispatch_rx, &gate, &reply_tx);
                })
                .map_err(|error| {
                    Error::worker_failure(
                        ExecutionUnit::Rank(rank),
                        format!("rank thread could not be started: {error}"),
                    )
                })?;

            world.dispatch.push(dispatch_tx);
            world.ranks.push(handle);
        }

        debug!(size = size.get(), "message-passing world started");

        Ok(world)
    }

    fn dispatch<I>(&mut self, slots: I, context: &W::Context) -> Result<()>
    where
        I: IntoIterator<Item = Vec<W::Batch>>,
    {
        for (rank, (sender, batches)) in (1_usize..).zip(self.dispatch.drain(..).zip(slots)) {
            trace!(rank, batches = batches.len(), "dispatching batches to rank");

            sender
                .send(Dispatch {
                    batches,
                    context: context.clone(),
                })
                .map_err(|_| {
                    Error::worker_failure(
                        ExecutionUnit::Rank(rank),
                        "rank exited before receiving its batches",
                    )
                })?;
        }

        Ok(())
    }

    /// Waits at the start gate together with every other rank.
    fn start(&self) -> Result<()> {
        if self.gate.wait() {
            Ok(())
        } else {
            Err(Error::worker_failure(
                ExecutionUnit::Rank(0),
                "start gate was broken before every rank arrived",
            ))
        }
    }

    /// Receives exactly one reply from each other rank and returns all partial results,
    /// the coordinator's own first.
    fn gather(&self, own: W::Output) -> Result<Vec<W::Output>> {
        let mut pending: BTreeSet<usize> = (1..=self.ranks.len()).collect();
        let mut partials = Vec::with_capacity(pending.len().saturating_add(1));
        partials.push(own);

        while !pending.is_empty() {
            let Ok(reply) = self.replies.recv() else {
                let missing = pending
                    .first()
                    .copied()
                    .expect("loop only runs while ranks are pending");

                return Err(Error::worker_failure(
                    ExecutionUnit::Rank(missing),
                    "rank exited without sending its partial result",
                ));
            };

            trace!(rank = reply.rank, "received partial result");

            if !pending.remove(&reply.rank) {
                return Err(Error::worker_failure(
                    ExecutionUnit::Rank(reply.rank),
                    "rank replied more than once",
                ));
            }

            partials.push(reply.outcome?);
        }

        Ok(partials)
    }
}

impl<W: Workload> Drop for World<W> {
    fn drop(&mut self) {
        // Ranks still waiting for their batches see the disconnect and exit.
        self.dispatch.clear();

        // Ranks waiting at the gate give up instead of waiting for the coordinator.
        self.gate.break_open();

        for handle in mem::take(&mut self.ranks) {
            if handle.join().is_err() {
                // Rank threads trap panics from workload code, so this is infrastructure failure.
                warn!("message-passing rank thread panicked outside the workload");
            }
        }
    }
}

fn rank_main<W: Workload>(
    rank: usize,
    dispatch: oneshot::Receiver<Dispatch<W>>,
    gate: &StartGate,
    replies: &mpsc::Sender<Reply<W>>,
) {
    debug!(rank, "rank started");

    let Ok(Dispatch { batches, context }) = dispatch.recv() else {
        debug!(rank, "world torn down before dispatch");
        return;
    };

    if !gate.wait() {
        debug!(rank, "world torn down at the start gate");
        return;
    }

    let outcome = fold_batches_trapped::<W>(ExecutionUnit::Rank(rank), &context, &batches);

    // If the coordinator already failed, nobody is listening any more.
    drop(replies.send(Reply { rank, outcome }));

    debug!(rank, "rank exiting");
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum GateStatus {
    Closed,
    Open,
    Broken,
}

#[derive(Debug)]
struct GateState {
    parties: usize,
    arrived: usize,
    status: GateStatus,
}

/// A one-shot barrier for the ranks of one world, which the coordinator can break.
#[derive(Debug)]
struct StartGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl StartGate {
    fn new(parties: NonZero<usize>) -> Self {
        Self {
            state: Mutex::new(GateState {
                parties: parties.get(),
                arrived: 0,
                status: GateStatus::Closed,
            }),
            changed: Condvar::new(),
        }
    }

    /// Blocks until every party has arrived. Returns `false` if the gate was broken instead.
    fn wait(&self) -> bool {
        let mut state = self.state.lock();
        state.arrived = state.arrived.saturating_add(1);

        if state.status == GateStatus::Closed && state.arrived >= state.parties {
            state.status = GateStatus::Open;
            self.changed.notify_all();
        }

        while state.status == GateStatus::Closed {
            self.changed.wait(&mut state);
        }

        state.status == GateStatus::Open
    }

    /// Releases every waiting party with a failure, unless the gate already opened.
    fn break_open(&self) {
        let mut state = self.state.lock();

        if state.status == GateStatus::Closed {
            state.status = GateStatus::Broken;
            self.changed.notify_all();
        }
    }
}
