#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for tests and benchmarks in the `par_scaling` workspace.

use std::{env, fs, panic};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

/// How long [`with_watchdog`] lets a test run before failing it.
///
/// Miri is dramatically slower at thread synchronization, so it gets more time.
pub const WATCHDOG_TIMEOUT: Duration = if cfg!(miri) {
    Duration::from_secs(60)
} else {
    Duration::from_secs(10)
};

/// Runs a test with a timeout so that a deadlocked backend fails the test instead of hanging
/// the whole test run.
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the watchdog is disabled and
/// the test function is executed directly, so that mutation testing can detect hanging mutations.
///
/// # Panics
///
/// Panics if the test exceeds [`WATCHDOG_TIMEOUT`]. A panic inside the test is propagated.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// let answer = with_watchdog(|| 6 * 7);
/// assert_eq!(answer, 42);
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    with_watchdog_timeout(WATCHDOG_TIMEOUT, test_fn)
}

/// Like [`with_watchdog`] but with a custom timeout, for tests that legitimately run longer.
///
/// # Panics
///
/// Panics if the test exceeds `timeout`. A panic inside the test is propagated.
pub fn with_watchdog_timeout<F, R>(timeout: Duration, test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    let test_handle = thread::spawn(move || {
        // If this fails, the watchdog already gave up on us.
        drop(tx.send(test_fn()));
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            test_handle.join().expect("test thread completed without panicking");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("test exceeded the watchdog timeout of {timeout:?}");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match test_handle.join() {
            Ok(()) => panic!("test thread exited without reporting a result"),
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}

/// Asserts that two floating point values are equal within a small relative tolerance.
///
/// # Panics
///
/// Panics if the values differ by more than one part in a billion of the larger magnitude.
#[track_caller]
pub fn assert_close(actual: f64, expected: f64) {
    assert_within(actual, expected, 1e-9);
}

/// Asserts that `actual` is within `tolerance` (relative to the larger magnitude) of `expected`.
///
/// # Panics
///
/// Panics if the values are further apart than the tolerance allows.
#[track_caller]
pub fn assert_within(actual: f64, expected: f64, tolerance: f64) {
    let scale = actual.abs().max(expected.abs()).max(1.0);
    let diff = (actual - expected).abs();

    assert!(
        diff <= tolerance * scale,
        "{actual} is not within {tolerance} of {expected} (difference {diff})"
    );
}

/// A scratch directory of text files, deleted when dropped.
///
/// # Example
///
/// ```rust
/// use testing::CorpusFixture;
///
/// let corpus = CorpusFixture::new();
/// let path = corpus.write("nested/file_01.txt", "hola mundo");
///
/// assert!(path.starts_with(corpus.path()));
/// assert_eq!(std::fs::read_to_string(path).unwrap(), "hola mundo");
/// ```
#[derive(Debug)]
pub struct CorpusFixture {
    dir: TempDir,
}

impl CorpusFixture {
    /// Creates a new empty directory.
    ///
    /// # Panics
    ///
    /// Panics if the directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("temporary directory can be created"),
        }
    }

    /// The root of the directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes `contents` to `name` (relative to the root), creating any missing parent
    /// directories, and returns the full path of the file.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn write(&self, name: impl AsRef<Path>, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("fixture directories can be created");
        }

        fs::write(&path, contents).expect("fixture file can be written");
        path
    }
}

impl Default for CorpusFixture {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn watchdog_returns_value() {
        assert_eq!(with_watchdog(|| "hello world"), "hello world");
    }

    #[test]
    #[should_panic(expected = "inner")]
    fn watchdog_propagates_panic() {
        with_watchdog::<_, ()>(|| panic!("inner"));
    }

    #[test]
    fn close_values_pass() {
        assert_close(0.1 + 0.2, 0.3);
        assert_within(10.0, 10.5, 0.1);
    }

    #[test]
    #[should_panic(expected = "is not within")]
    fn distant_values_fail() {
        assert_close(1.0, 1.1);
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Miri does not support real filesystem access.
    fn fixture_creates_nested_files() {
        let fixture = CorpusFixture::new();
        let path = fixture.write("a/b/c.txt", "x");

        assert_eq!(fs::read_to_string(&path).unwrap(), "x");
        assert_eq!(path, fixture.path().join("a").join("b").join("c.txt"));

        let root = fixture.path().to_path_buf();
        drop(fixture);
        assert!(!root.exists());
    }
}
