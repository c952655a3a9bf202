//! Places worker threads onto processors.

use std::io;
use std::thread::{self, JoinHandle};

use many_cpus::{ProcessorSet, SystemHardware};
use tracing::trace;

/// Spreads the workers of one run round-robin across the processors available to the process.
///
/// Worker `i` is pinned to processor `i mod processor_count`, so runs with more workers than
/// processors oversubscribe evenly.
#[derive(Debug)]
pub(crate) struct Placement {
    processors: Vec<ProcessorSet>,
}

impl Placement {
    pub(crate) fn current() -> Self {
        let processors = SystemHardware::current().processors().decompose();

        Self {
            processors: processors.into_iter().collect(),
        }
    }

    fn processors_for(&self, worker: usize) -> &ProcessorSet {
        worker
            .checked_rem(self.processors.len())
            .and_then(|index| self.processors.get(index))
            .expect("a processor set decomposes into at least one single-processor set")
    }

    /// Spawns a named thread for `worker`, pinned to its processor before `entrypoint` runs.
    pub(crate) fn spawn<F, R>(
        &self,
        name: String,
        worker: usize,
        entrypoint: F,
    ) -> io::Result<JoinHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let processors = self.processors_for(worker).clone();

        thread::Builder::new().name(name).spawn(move || {
            processors.pin_current_thread_to();
            trace!(worker, "worker thread pinned");

            entrypoint()
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    #[cfg_attr(miri, ignore)] // Miri does not support talking to the real platform.
    fn oversubscribed_workers_wrap_around() {
        let placement = Placement::current();
        let count = placement.processors.len();

        let first = placement.processors_for(0).processors().first().id();
        let wrapped = placement.processors_for(count).processors().first().id();

        assert_eq!(first, wrapped);
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Miri does not support talking to the real platform.
    fn spawned_thread_carries_name_and_result() {
        let placement = Placement::current();

        let handle = placement
            .spawn("placement-test".to_string(), 3, || {
                thread::current().name().map(str::to_owned)
            })
            .unwrap();

        assert_eq!(handle.join().unwrap().as_deref(), Some("placement-test"));
    }
}
