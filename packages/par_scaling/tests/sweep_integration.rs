//! End-to-end sweeps over generated inputs, from configuration to derived metrics.

use std::path::PathBuf;
use std::time::Duration;

use foldhash::{HashMap, HashMapExt};
use new_zealand::nz;
use par_scaling::{
    BackendKind, Configuration, Error, Measurement, MeasurementTable, PrimeCount, PrimeDigits,
    Result, Sweep, SweepConfig, WordFrequency, WorkloadSource, efficiency, scaling_points,
    speedup,
};
use testing::{CorpusFixture, assert_within, with_watchdog_timeout};

const SWEEP_TIMEOUT: Duration = Duration::from_secs(60);

#[test]
#[cfg_attr(miri, ignore)] // Miri does not support talking to the real platform.
fn prime_sweep_records_every_cell() {
    with_watchdog_timeout(SWEEP_TIMEOUT, || {
        let sweep = Sweep::new([2, 3], BackendKind::ALL, [nz!(1), nz!(2), nz!(3)]).unwrap();
        let mut counts = Vec::new();

        let table = sweep.execute_with(&mut PrimeDigits::default(), |cell, outcome| {
            counts.push((
                cell.problem_size(),
                outcome.as_ref().unwrap().result().clone(),
            ));
        });

        assert_eq!(table.len(), 2 * (1 + 2 * 3));
        assert!(table.iter().all(|measurement| !measurement.is_failure()));

        for (size, count) in counts {
            let expected = match size {
                2 => 21,
                3 => 143,
                other => panic!("unexpected size {other}"),
            };
            assert_eq!(count, PrimeCount::new(expected));
        }
    });
}

#[test]
#[cfg_attr(miri, ignore)] // Miri does not support talking to the real platform.
fn word_sweep_from_configuration() {
    with_watchdog_timeout(SWEEP_TIMEOUT, || {
        let fixture = CorpusFixture::new();

        let mut config = SweepConfig::from_toml_str(
            r#"
            workload = "words"
            sizes = "3,5"
            workers = "1-2"
            min_words = 50
            max_words = 80
            seed = 11
            "#,
        )
        .unwrap();
        config.corpus_dir = fixture.path().join("corpus");

        let sweep = config.sweep().unwrap();
        let mut source = config.synthetic_corpus().unwrap();
        let mut results = HashMap::new();

        let table = sweep.execute_with(&mut source, |cell, outcome| {
            let counts = outcome.as_ref().unwrap().result().clone();

            // Each size must produce one answer, whichever backend computed it.
            let previous = results.entry(cell.problem_size()).or_insert_with(|| counts.clone());
            assert_eq!(*previous, counts, "{cell:?}");
        });

        assert_eq!(table.len(), 2 * (1 + 2 * 2));
        assert!(table.iter().all(|measurement| !measurement.is_failure()));

        // The reference holds 20 distinct words and the corpus files hold at most 80 words each.
        assert!(results[&3].total() > 0);
        assert!(results[&3].total() <= 3 * 80);
        assert!(results[&5].len() <= 20);

        // The corpus for the last size is left in place.
        assert!(config.corpus_dir.join("file_06.txt").exists());
        assert!(!config.corpus_dir.join("file_07.txt").exists());
    });
}

/// Word workloads over a fixture where problem size `n` counts the first `n` corpus files and
/// size 1 additionally refers to a file that was never written.
struct HoleyCorpus {
    fixture: CorpusFixture,
    files: Vec<PathBuf>,
}

impl HoleyCorpus {
    fn new() -> Self {
        let fixture = CorpusFixture::new();
        fixture.write("file_01.txt", "sol luna");

        let files = ["file_02.txt", "file_03.txt"]
            .into_iter()
            .map(|name| fixture.write(name, "sol sol luna estrella"))
            .collect();

        Self { fixture, files }
    }
}

impl WorkloadSource for HoleyCorpus {
    type Workload = WordFrequency;

    fn prepare(&mut self, problem_size: u64) -> Result<WordFrequency> {
        let count = usize::try_from(problem_size).unwrap();
        let mut files = self.files[..count].to_vec();

        if problem_size == 1 {
            files.push(self.fixture.path().join("file_99.txt"));
        }

        WordFrequency::new(self.fixture.path().join("file_01.txt"), files)
    }
}

#[test]
#[cfg_attr(miri, ignore)] // Miri does not support talking to the real platform.
fn missing_corpus_file_fails_only_its_cells() {
    with_watchdog_timeout(SWEEP_TIMEOUT, || {
        let sweep = Sweep::new([1, 2], BackendKind::ALL, [nz!(2)]).unwrap();
        let mut missing = Vec::new();

        let table = sweep.execute_with(&mut HoleyCorpus::new(), |cell, outcome| match outcome {
            Err(Error::MissingInput { path, .. }) => {
                assert!(path.ends_with("file_99.txt"), "{path:?}");
                missing.push(cell.backend());
            }
            Err(other) => panic!("{cell:?}: unexpected error {other}"),
            Ok(run) => {
                assert_eq!(cell.problem_size(), 2, "{cell:?}");
                assert_eq!(run.result().get("sol"), 4);
                assert_eq!(run.result().get("luna"), 2);
            }
        });

        assert_eq!(missing, BackendKind::ALL.to_vec());

        for backend in BackendKind::ALL {
            let workers = backend.effective_workers(nz!(2));
            assert_eq!(table.elapsed(&Configuration::new(1, backend, workers)), None);
            assert!(table.elapsed(&Configuration::new(2, backend, workers)).is_some());
        }
    });
}

#[test]
#[cfg_attr(miri, ignore)] // Miri does not support talking to the real platform.
fn metrics_are_defined_for_successful_cells() {
    with_watchdog_timeout(SWEEP_TIMEOUT, || {
        let sweep = Sweep::new([4], BackendKind::ALL, [nz!(1), nz!(2)]).unwrap();
        let table = sweep.execute(&mut PrimeDigits::new(nz!(100)));

        let points = scaling_points(&table);
        assert_eq!(points.len(), table.len());

        for point in &points {
            let configuration = point.configuration();
            assert!(point.speedup() > 0.0);
            assert!(point.efficiency() > 0.0);
            assert_eq!(
                speedup(
                    &table,
                    configuration.problem_size(),
                    configuration.backend(),
                    configuration.workers()
                ),
                Some(point.speedup())
            );
        }

        // The baseline is, by definition, exactly as fast as itself.
        let baseline = speedup(&table, 4, BackendKind::Sequential, nz!(1)).unwrap();
        assert_within(baseline, 1.0, 1e-12);
    });
}

#[test]
#[cfg_attr(miri, ignore)] // Miri does not support talking to the real platform.
fn single_worker_is_not_wildly_slower_than_sequential() {
    with_watchdog_timeout(SWEEP_TIMEOUT, || {
        let sweep = Sweep::new([5], BackendKind::ALL, [nz!(1)]).unwrap();
        let table = sweep.execute(&mut PrimeDigits::new(nz!(1_000)));

        for backend in [BackendKind::MessagePassing, BackendKind::TaskGraph] {
            let value = speedup(&table, 5, backend, nz!(1)).unwrap();

            // Scheduling noise on shared test machines is large, so only gross regressions count.
            assert!(value > 0.1, "{backend} speedup {value}");
            assert_eq!(efficiency(&table, 5, backend, nz!(1)), Some(value));
        }
    });
}

#[test]
fn failed_cells_leave_metrics_undefined() {
    let table: MeasurementTable = [
        Measurement::new(Configuration::baseline(7), Some(Duration::from_millis(900))),
        Measurement::new(
            Configuration::new(7, BackendKind::MessagePassing, nz!(3)),
            None,
        ),
        Measurement::new(
            Configuration::new(7, BackendKind::TaskGraph, nz!(3)),
            Some(Duration::from_millis(300)),
        ),
    ]
    .into_iter()
    .collect();

    assert_eq!(speedup(&table, 7, BackendKind::MessagePassing, nz!(3)), None);
    assert_eq!(efficiency(&table, 7, BackendKind::MessagePassing, nz!(3)), None);

    assert_within(
        speedup(&table, 7, BackendKind::TaskGraph, nz!(3)).unwrap(),
        3.0,
        1e-9,
    );
    assert_within(
        efficiency(&table, 7, BackendKind::TaskGraph, nz!(3)).unwrap(),
        1.0,
        1e-9,
    );

    assert_eq!(scaling_points(&table).len(), 2);
}
