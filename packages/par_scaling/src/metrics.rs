//! Speedup and parallel efficiency derived from a [`MeasurementTable`].

use std::num::NonZero;
use std::time::Duration;

use crate::{BackendKind, Configuration, MeasurementTable};

/// How many times faster `backend` with `workers` ran than the sequential baseline at the same
/// problem size.
///
/// Undefined (`None`) if either measurement is absent or the parallel run took no measurable time.
/// An absent measurement is never treated as zero.
#[must_use]
pub fn speedup(
    table: &MeasurementTable,
    problem_size: u64,
    backend: BackendKind,
    workers: NonZero<usize>,
) -> Option<f64> {
    let baseline = table.elapsed(&Configuration::baseline(problem_size))?;
    let elapsed = table.elapsed(&Configuration::new(problem_size, backend, workers))?;

    ratio(baseline, elapsed)
}

/// Speedup divided by the worker count.
///
/// Undefined whenever [`speedup`] is.
#[must_use]
pub fn efficiency(
    table: &MeasurementTable,
    problem_size: u64,
    backend: BackendKind,
    workers: NonZero<usize>,
) -> Option<f64> {
    let workers = backend.effective_workers(workers);

    speedup(table, problem_size, backend, workers).map(|speedup| per_worker(speedup, workers))
}

fn ratio(baseline: Duration, elapsed: Duration) -> Option<f64> {
    if elapsed.is_zero() {
        return None;
    }

    Some(baseline.as_secs_f64() / elapsed.as_secs_f64())
}

#[expect(
    clippy::cast_precision_loss,
    reason = "worker counts are far below the 2^52 where precision loss begins"
)]
fn per_worker(value: f64, workers: NonZero<usize>) -> f64 {
    value / workers.get() as f64
}

/// A successful measurement together with its derived metrics.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScalingPoint {
    configuration: Configuration,
    elapsed: Duration,
    speedup: f64,
    efficiency: f64,
}

impl ScalingPoint {
    /// The configuration that was measured.
    #[must_use]
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// How long the run took.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// See [`speedup`].
    #[must_use]
    pub fn speedup(&self) -> f64 {
        self.speedup
    }

    /// See [`efficiency`].
    #[must_use]
    pub fn efficiency(&self) -> f64 {
        self.efficiency
    }
}

/// Every measurement in `table` for which speedup is defined, in table order.
#[must_use]
pub fn scaling_points(table: &MeasurementTable) -> Vec<ScalingPoint> {
    table
        .iter()
        .filter_map(|measurement| {
            let configuration = *measurement.configuration();
            let elapsed = measurement.elapsed()?;
            let baseline = table.elapsed(&Configuration::baseline(configuration.problem_size()))?;
            let speedup = ratio(baseline, elapsed)?;

            Some(ScalingPoint {
                configuration,
                elapsed,
                speedup,
                efficiency: per_worker(speedup, configuration.workers()),
            })
        })
        .collect()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;
    use testing::assert_close;

    use super::*;
    use crate::Measurement;

    fn table() -> MeasurementTable {
        [
            Measurement::new(Configuration::baseline(10), Some(Duration::from_secs(8))),
            Measurement::new(
                Configuration::new(10, BackendKind::MessagePassing, nz!(2)),
                Some(Duration::from_secs(5)),
            ),
            Measurement::new(
                Configuration::new(10, BackendKind::MessagePassing, nz!(4)),
                Some(Duration::from_secs(2)),
            ),
            Measurement::new(
                Configuration::new(10, BackendKind::TaskGraph, nz!(4)),
                None,
            ),
            Measurement::new(
                Configuration::new(10, BackendKind::TaskGraph, nz!(2)),
                Some(Duration::ZERO),
            ),
            Measurement::new(Configuration::baseline(20), None),
            Measurement::new(
                Configuration::new(20, BackendKind::TaskGraph, nz!(2)),
                Some(Duration::from_secs(3)),
            ),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn speedup_relative_to_baseline() {
        let table = table();

        assert_close(speedup(&table, 10, BackendKind::MessagePassing, nz!(2)).unwrap(), 1.6);
        assert_close(speedup(&table, 10, BackendKind::MessagePassing, nz!(4)).unwrap(), 4.0);
        assert_close(speedup(&table, 10, BackendKind::Sequential, nz!(1)).unwrap(), 1.0);
    }

    #[test]
    fn efficiency_divides_by_workers() {
        let table = table();

        assert_close(efficiency(&table, 10, BackendKind::MessagePassing, nz!(2)).unwrap(), 0.8);
        assert_close(efficiency(&table, 10, BackendKind::MessagePassing, nz!(4)).unwrap(), 1.0);
    }

    #[test]
    fn absent_measurements_are_undefined() {
        let table = table();

        // Failed parallel run.
        assert_eq!(speedup(&table, 10, BackendKind::TaskGraph, nz!(4)), None);
        // Failed baseline.
        assert_eq!(speedup(&table, 20, BackendKind::TaskGraph, nz!(2)), None);
        assert_eq!(efficiency(&table, 20, BackendKind::TaskGraph, nz!(2)), None);
        // Never executed.
        assert_eq!(speedup(&table, 10, BackendKind::TaskGraph, nz!(8)), None);
    }

    #[test]
    fn zero_denominator_is_undefined() {
        assert_eq!(speedup(&table(), 10, BackendKind::TaskGraph, nz!(2)), None);
    }

    #[test]
    fn scaling_points_skip_undefined_rows() {
        let points = scaling_points(&table());

        assert_eq!(points.len(), 3);
        assert_eq!(points[0].configuration(), &Configuration::baseline(10));
        assert_close(points[0].efficiency(), 1.0);
        assert_close(points[2].speedup(), 4.0);
        assert_close(points[2].efficiency(), 1.0);
        assert_eq!(points[2].elapsed(), Duration::from_secs(2));
    }
}
