//! Runs a grid of problem sizes, backends and worker counts and records how long each took.

use std::num::NonZero;
use std::slice;
use std::time::Duration;

use foldhash::{HashMap, HashMapExt};
use itertools::Itertools;
use tracing::{info, warn};

use crate::{BackendKind, Error, Result, RunOutcome, Workload, WorkloadSource};

/// One cell of a sweep grid.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Configuration {
    problem_size: u64,
    backend: BackendKind,
    workers: NonZero<usize>,
}

impl Configuration {
    /// Creates a configuration. The worker count is forced to one for the sequential backend.
    #[must_use]
    pub fn new(problem_size: u64, backend: BackendKind, workers: NonZero<usize>) -> Self {
        Self {
            problem_size,
            backend,
            workers: backend.effective_workers(workers),
        }
    }

    /// The sequential baseline for `problem_size`.
    #[must_use]
    pub fn baseline(problem_size: u64) -> Self {
        Self::new(problem_size, BackendKind::Sequential, NonZero::<usize>::MIN)
    }

    /// The problem size, in whatever unit the workload source uses.
    #[must_use]
    pub fn problem_size(&self) -> u64 {
        self.problem_size
    }

    /// The backend.
    #[must_use]
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// The worker count.
    #[must_use]
    pub fn workers(&self) -> NonZero<usize> {
        self.workers
    }
}

/// The outcome of running one [`Configuration`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Measurement {
    configuration: Configuration,
    elapsed: Option<Duration>,
}

impl Measurement {
    /// Creates a measurement. `elapsed` is `None` if the run failed.
    #[must_use]
    pub fn new(configuration: Configuration, elapsed: Option<Duration>) -> Self {
        Self {
            configuration,
            elapsed,
        }
    }

    /// The configuration that was run.
    #[must_use]
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// How long the run took, absent if it failed.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    /// How long the run took in seconds, absent if it failed.
    #[must_use]
    pub fn elapsed_seconds(&self) -> Option<f64> {
        self.elapsed.as_ref().map(Duration::as_secs_f64)
    }

    /// Whether the run failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.elapsed.is_none()
    }
}

/// Measurements in the order their cells were executed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MeasurementTable {
    rows: Vec<Measurement>,
}

impl MeasurementTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a measurement.
    pub fn push(&mut self, measurement: Measurement) {
        self.rows.push(measurement);
    }

    /// All measurements, in execution order.
    #[must_use]
    pub fn rows(&self) -> &[Measurement] {
        &self.rows
    }

    /// Iterates over all measurements, in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &Measurement> {
        self.rows.iter()
    }

    /// The number of measurements, including failed ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no measurements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The first measurement of `configuration`, if it was executed.
    #[must_use]
    pub fn get(&self, configuration: &Configuration) -> Option<&Measurement> {
        self.rows
            .iter()
            .find(|row| row.configuration() == configuration)
    }

    /// The elapsed time of `configuration`, absent if it was not executed or failed.
    #[must_use]
    pub fn elapsed(&self, configuration: &Configuration) -> Option<Duration> {
        self.get(configuration).and_then(Measurement::elapsed)
    }
}

impl FromIterator<Measurement> for MeasurementTable {
    fn from_iter<T: IntoIterator<Item = Measurement>>(iter: T) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a MeasurementTable {
    type Item = &'a Measurement;
    type IntoIter = slice::Iter<'a, Measurement>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// A grid of problem sizes, backends and worker counts to measure.
///
/// Cells run strictly one after another on the calling thread. For each problem size the
/// sequential baseline runs first (once, with one worker), followed by every parallel backend at
/// every worker count. A failing cell is recorded as a measurement without an elapsed time and
/// the rest of the grid still runs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Sweep {
    problem_sizes: Vec<u64>,
    backends: Vec<BackendKind>,
    worker_counts: Vec<NonZero<usize>>,
}

impl Sweep {
    /// Creates a sweep. Duplicate entries are removed, keeping first occurrences.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if any of the lists is empty.
    pub fn new(
        problem_sizes: impl IntoIterator<Item = u64>,
        backends: impl IntoIterator<Item = BackendKind>,
        worker_counts: impl IntoIterator<Item = NonZero<usize>>,
    ) -> Result<Self> {
        let problem_sizes: Vec<u64> = problem_sizes.into_iter().unique().collect();
        let backends: Vec<BackendKind> = backends.into_iter().unique().collect();
        let worker_counts: Vec<NonZero<usize>> = worker_counts.into_iter().unique().collect();

        for (name, empty) in [
            ("problem sizes", problem_sizes.is_empty()),
            ("backends", backends.is_empty()),
            ("worker counts", worker_counts.is_empty()),
        ] {
            if empty {
                return Err(Error::InvalidConfig {
                    problem: format!("a sweep needs at least one entry in its {name}"),
                });
            }
        }

        Ok(Self {
            problem_sizes,
            backends,
            worker_counts,
        })
    }

    /// Every cell of the grid, in execution order.
    #[must_use]
    pub fn cells(&self) -> Vec<Configuration> {
        let mut cells = Vec::new();

        for &problem_size in &self.problem_sizes {
            if self.backends.contains(&BackendKind::Sequential) {
                cells.push(Configuration::baseline(problem_size));
            }

            for &backend in self
                .backends
                .iter()
                .filter(|backend| **backend != BackendKind::Sequential)
            {
                for &workers in &self.worker_counts {
                    cells.push(Configuration::new(problem_size, backend, workers));
                }
            }
        }

        cells
    }

    /// Runs every cell with workloads from `source`.
    pub fn execute<S: WorkloadSource>(&self, source: &mut S) -> MeasurementTable {
        self.execute_with(source, |_, _| {})
    }

    /// Runs every cell with workloads from `source`, calling `on_cell` with each outcome as soon
    /// as it is available.
    pub fn execute_with<S, F>(&self, source: &mut S, mut on_cell: F) -> MeasurementTable
    where
        S: WorkloadSource,
        F: FnMut(&Configuration, &Result<RunOutcome<<S::Workload as Workload>::Output>>),
    {
        let mut table = MeasurementTable::new();
        let mut baselines = HashMap::new();

        for cell in self.cells() {
            let outcome = source
                .prepare(cell.problem_size())
                .and_then(|workload| cell.backend().run(&workload, cell.workers()));

            match &outcome {
                Ok(run) => {
                    info!(
                        problem_size = cell.problem_size(),
                        backend = %cell.backend(),
                        workers = cell.workers().get(),
                        seconds = run.elapsed_seconds(),
                        "cell completed"
                    );

                    cross_check(&cell, run.result(), &mut baselines);
                }
                Err(error) => {
                    warn!(
                        problem_size = cell.problem_size(),
                        backend = %cell.backend(),
                        workers = cell.workers().get(),
                        %error,
                        "cell failed"
                    );
                }
            }

            on_cell(&cell, &outcome);

            table.push(Measurement::new(
                cell,
                outcome.as_ref().ok().map(RunOutcome::elapsed),
            ));
        }

        table
    }
}

/// Remembers sequential results and warns when a parallel result at the same size differs.
fn cross_check<R: PartialEq + Clone>(
    cell: &Configuration,
    result: &R,
    baselines: &mut HashMap<u64, R>,
) {
    if cell.backend() == BackendKind::Sequential {
        baselines.insert(cell.problem_size(), result.clone());
        return;
    }

    if let Some(baseline) = baselines.get(&cell.problem_size()) {
        if baseline != result {
            warn!(
                problem_size = cell.problem_size(),
                backend = %cell.backend(),
                workers = cell.workers().get(),
                "result differs from the sequential baseline"
            );
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::ops::Range;

    use new_zealand::nz;
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::{PrimeCount, PrimeDigits, PrimeRange, partition_range};

    assert_impl_all!(MeasurementTable: Send, Sync);
    assert_impl_all!(Configuration: Send, Sync, Copy);

    /// Fails to prepare one problem size and counts how often it was asked.
    struct FlakySource {
        bad_size: u64,
        prepared: usize,
    }

    impl WorkloadSource for FlakySource {
        type Workload = PrimeRange;

        fn prepare(&mut self, problem_size: u64) -> Result<PrimeRange> {
            self.prepared += 1;

            if problem_size == self.bad_size {
                return Err(Error::InvalidWorkload {
                    problem: "deliberately broken".to_string(),
                });
            }

            PrimeRange::new(1..problem_size, nz!(10))
        }
    }

    /// Panics while processing any batch when `explode` is set.
    struct Fused {
        explode: bool,
    }

    impl Workload for Fused {
        type Batch = Range<u64>;
        type Context = bool;
        type Output = PrimeCount;

        fn partition(&self) -> Result<Vec<Self::Batch>> {
            Ok(partition_range(0..4, nz!(2)))
        }

        fn load_context(&self) -> Result<bool> {
            Ok(self.explode)
        }

        fn process(explode: &bool, _batch: &Self::Batch) -> Result<PrimeCount> {
            assert!(!explode, "fused workload exploded");
            Ok(PrimeCount::new(1))
        }
    }

    /// Hands out a workload that panics for problem size 1 and a healthy one otherwise.
    struct FusedSource;

    impl WorkloadSource for FusedSource {
        type Workload = Fused;

        fn prepare(&mut self, problem_size: u64) -> Result<Fused> {
            Ok(Fused {
                explode: problem_size == 1,
            })
        }
    }

    #[test]
    fn sequential_forced_to_one_worker() {
        let cell = Configuration::new(3, BackendKind::Sequential, nz!(4));

        assert_eq!(cell.workers().get(), 1);
        assert_eq!(cell, Configuration::baseline(3));
    }

    #[test]
    fn cells_run_baseline_first_per_size() {
        let sweep = Sweep::new(
            [2, 3],
            [BackendKind::TaskGraph, BackendKind::Sequential],
            [nz!(2), nz!(4)],
        )
        .unwrap();

        let cells = sweep.cells();

        assert_eq!(cells.len(), 6);
        assert_eq!(cells[0], Configuration::baseline(2));
        assert_eq!(cells[1], Configuration::new(2, BackendKind::TaskGraph, nz!(2)));
        assert_eq!(cells[2], Configuration::new(2, BackendKind::TaskGraph, nz!(4)));
        assert_eq!(cells[3], Configuration::baseline(3));
    }

    #[test]
    fn duplicates_are_removed() {
        let sweep = Sweep::new([2, 2], [BackendKind::Sequential], [nz!(1), nz!(1)]).unwrap();

        assert_eq!(sweep.cells().len(), 1);
    }

    #[test]
    fn empty_lists_are_rejected() {
        assert!(matches!(
            Sweep::new([], [BackendKind::Sequential], [nz!(1)]),
            Err(Error::InvalidConfig { .. })
        ));
        assert!(matches!(
            Sweep::new([1], [], [nz!(1)]),
            Err(Error::InvalidConfig { .. })
        ));
        assert!(matches!(
            Sweep::new([1], [BackendKind::Sequential], []),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn failed_cell_is_absent_and_later_cells_run() {
        let sweep = Sweep::new([50, 60, 70], [BackendKind::Sequential], [nz!(1)]).unwrap();
        let mut source = FlakySource {
            bad_size: 60,
            prepared: 0,
        };

        let table = sweep.execute(&mut source);

        assert_eq!(source.prepared, 3);
        assert_eq!(table.len(), 3);
        assert!(table.elapsed(&Configuration::baseline(50)).is_some());
        assert!(table.get(&Configuration::baseline(60)).unwrap().is_failure());
        assert!(table.elapsed(&Configuration::baseline(70)).is_some());
    }

    #[test]
    fn panicking_cell_does_not_abort_the_sweep() {
        let sweep = Sweep::new([1, 2], BackendKind::ALL, [nz!(2)]).unwrap();
        let mut failures = Vec::new();

        let table = sweep.execute_with(&mut FusedSource, |cell, outcome| {
            if let Err(Error::WorkerFailure { reason, .. }) = outcome {
                assert!(reason.contains("exploded"), "{reason}");
                failures.push(cell.backend());
            }
        });

        assert_eq!(failures, BackendKind::ALL.to_vec());
        assert_eq!(table.len(), 6);

        for cell in sweep.cells() {
            let measurement = table.get(&cell).unwrap();
            assert_eq!(measurement.is_failure(), cell.problem_size() == 1, "{cell:?}");
        }
    }

    #[test]
    fn callback_sees_every_outcome() {
        let sweep = Sweep::new([2, 3], [BackendKind::Sequential], [nz!(1)]).unwrap();
        let mut seen = Vec::new();

        let table = sweep.execute_with(&mut PrimeDigits::default(), |cell, outcome| {
            seen.push((cell.problem_size(), outcome.as_ref().unwrap().result().get()));
        });

        assert_eq!(seen, vec![(2, 21), (3, 143)]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn table_lookup_ignores_failures() {
        let ok = Configuration::baseline(1);
        let failed = Configuration::baseline(2);

        let table: MeasurementTable = [
            Measurement::new(ok, Some(Duration::from_millis(5))),
            Measurement::new(failed, None),
        ]
        .into_iter()
        .collect();

        assert_eq!(table.elapsed(&ok), Some(Duration::from_millis(5)));
        assert_eq!(table.elapsed(&failed), None);
        assert_eq!(table.elapsed(&Configuration::baseline(3)), None);
        let seconds = table.get(&ok).unwrap().elapsed_seconds().unwrap();
        assert!((seconds - 0.005).abs() < 1e-9);
    }
}
