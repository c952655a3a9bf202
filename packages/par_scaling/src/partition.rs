//! Splitting workload domains into batches and assigning batches to workers.

use std::num::NonZero;
use std::ops::Range;
use std::path::{Path, PathBuf};

use foldhash::{HashMap, HashMapExt};

use crate::{Error, Result};

/// Splits `domain` into consecutive batches of `batch_size` integers.
///
/// Batch `i` covers `[start + i * batch_size, min(start + (i + 1) * batch_size, end))`, so only the
/// final batch may be shorter. An empty domain yields no batches.
#[must_use]
pub fn partition_range(domain: Range<u64>, batch_size: NonZero<u64>) -> Vec<Range<u64>> {
    let mut batches = Vec::new();
    let mut start = domain.start;

    while start < domain.end {
        let end = start.saturating_add(batch_size.get()).min(domain.end);
        batches.push(start..end);
        start = end;
    }

    batches
}

/// An ordered group of corpus files processed together as one unit of work.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct FileBatch {
    paths: Vec<PathBuf>,
}

impl FileBatch {
    /// Creates a batch of the given files, processed in the given order.
    #[must_use]
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    /// The files in this batch.
    #[must_use]
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

/// Groups `files` into batches of `files_per_batch` consecutive files, preserving order.
///
/// Files are never split. With `files_per_batch` of one, each file is its own batch.
#[must_use]
pub fn partition_files(files: &[PathBuf], files_per_batch: NonZero<usize>) -> Vec<FileBatch> {
    files
        .chunks(files_per_batch.get())
        .map(|chunk| FileBatch::new(chunk.to_vec()))
        .collect()
}

/// Checks that `batches` are non-empty, pairwise disjoint and together cover `domain` exactly.
///
/// The batches may be given in any order.
///
/// # Errors
///
/// Returns [`Error::PartitionInvariantViolation`] describing the first gap, overlap or
/// empty batch found.
pub fn verify_range_cover(domain: &Range<u64>, batches: &[Range<u64>]) -> Result<()> {
    let mut sorted: Vec<&Range<u64>> = batches.iter().collect();
    sorted.sort_by_key(|batch| batch.start);

    let mut expected_start = domain.start;

    for batch in sorted {
        if batch.is_empty() {
            return Err(violation(format!("batch {batch:?} is empty")));
        }

        if batch.start != expected_start {
            return Err(violation(format!(
                "batch {batch:?} starts at {} but the previous batch ended at {expected_start}",
                batch.start
            )));
        }

        expected_start = batch.end;
    }

    if expected_start != domain.end {
        return Err(violation(format!(
            "batches end at {expected_start} but the domain {domain:?} ends at {}",
            domain.end
        )));
    }

    Ok(())
}

/// Checks that every file in `files` appears in exactly one of `batches`, and nothing else does.
///
/// # Errors
///
/// Returns [`Error::PartitionInvariantViolation`] naming the first file that is missing,
/// duplicated or unexpected.
pub fn verify_file_cover(files: &[PathBuf], batches: &[FileBatch]) -> Result<()> {
    let mut remaining: HashMap<&Path, usize> = HashMap::with_capacity(files.len());

    for file in files {
        let slot = remaining.entry(file.as_path()).or_default();
        *slot = slot.saturating_add(1);
    }

    for path in batches.iter().flat_map(FileBatch::paths) {
        match remaining.get_mut(path.as_path()) {
            Some(count) if *count > 0 => *count = count.saturating_sub(1),
            Some(_) => {
                return Err(violation(format!(
                    "file '{}' is assigned more than once",
                    path.display()
                )));
            }
            None => {
                return Err(violation(format!(
                    "file '{}' is not part of the workload",
                    path.display()
                )));
            }
        }
    }

    if let Some((path, _)) = remaining.iter().find(|(_, count)| **count > 0) {
        return Err(violation(format!(
            "file '{}' is not assigned to any batch",
            path.display()
        )));
    }

    Ok(())
}

fn violation(problem: String) -> Error {
    Error::PartitionInvariantViolation { problem }
}

/// A round-robin assignment of batches to worker slots.
///
/// Batch `i` belongs to worker `i mod worker_count`, so every worker holds either
/// `⌊N / worker_count⌋` or `⌈N / worker_count⌉` of the `N` batches, in their original relative
/// order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Assignment<B> {
    slots: Vec<Vec<B>>,
}

/// Assigns `batches` to `worker_count` workers round-robin.
#[must_use]
pub fn assign_round_robin<B, I>(batches: I, worker_count: NonZero<usize>) -> Assignment<B>
where
    I: IntoIterator<Item = B>,
{
    let mut slots: Vec<Vec<B>> = (0..worker_count.get()).map(|_| Vec::new()).collect();

    for (index, batch) in batches.into_iter().enumerate() {
        slots
            .get_mut(index % worker_count)
            .expect("index modulo worker count is always a valid slot")
            .push(batch);
    }

    Assignment { slots }
}

impl<B> Assignment<B> {
    /// The number of worker slots, including those that received no batches.
    #[must_use]
    pub fn worker_count(&self) -> NonZero<usize> {
        NonZero::new(self.slots.len()).expect("an assignment always has at least one worker slot")
    }

    /// The batches assigned to `worker`, empty if the worker index is out of range.
    #[must_use]
    pub fn batches_for(&self, worker: usize) -> &[B] {
        self.slots.get(worker).map_or(&[], Vec::as_slice)
    }

    /// The total number of assigned batches.
    #[must_use]
    pub fn total_batches(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }

    /// Consumes the assignment, returning one batch list per worker indexed by worker.
    #[must_use]
    pub fn into_slots(self) -> Vec<Vec<B>> {
        self.slots
    }
}
