use std::fmt;
use std::fs;
use std::iter;
use std::num::NonZero;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use foldhash::{HashSet, HashSetExt};
use new_zealand::nz;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    Error, FileBatch, PartialResult, PrimeCount, Result, TokenCounts, partition_files,
    partition_range, verify_file_cover, verify_range_cover,
};

/// A partitionable computation whose partial results combine associatively.
///
/// A workload is immutable once constructed. Execution backends obtain the batch list and the
/// shared context from it once per run, then hand batches and a copy of the context to workers,
/// which call [`process`][Self::process]. Workers never see the workload itself.
pub trait Workload: Send + Sync + 'static {
    /// One unit of work: an integer sub-range or a group of files.
    type Batch: Clone + fmt::Debug + Send + 'static;

    /// Read-only data every batch needs, broadcast by value to each worker.
    type Context: Clone + Send + Sync + 'static;

    /// The partial result of processing one or more batches.
    type Output: PartialResult;

    /// Fails early if the workload refers to input that cannot possibly be processed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingInput`] if an input file does not exist.
    fn check_inputs(&self) -> Result<()> {
        Ok(())
    }

    /// Splits the domain into batches that cover it exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PartitionInvariantViolation`] if the generated batches do not
    /// cover the domain exactly once.
    fn partition(&self) -> Result<Vec<Self::Batch>>;

    /// Loads the shared context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingInput`] if the context is read from a file that cannot be read.
    fn load_context(&self) -> Result<Self::Context>;

    /// Processes one batch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingInput`] if the batch refers to a file that cannot be read.
    fn process(context: &Self::Context, batch: &Self::Batch) -> Result<Self::Output>;
}

/// Batch size used by the prime workload unless configured otherwise.
pub const DEFAULT_PRIME_BATCH_SIZE: NonZero<u64> = nz!(10);

/// The largest digit count whose numbers still fit in a `u64`.
pub const MAX_PRIME_DIGITS: u32 = 19;

/// Counts the primes in a half-open integer range.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PrimeRange {
    domain: Range<u64>,
    batch_size: NonZero<u64>,
}

impl PrimeRange {
    /// Creates a workload over `domain`, split into batches of `batch_size` integers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidWorkload`] if the domain is empty.
    pub fn new(domain: Range<u64>, batch_size: NonZero<u64>) -> Result<Self> {
        if domain.is_empty() {
            return Err(Error::InvalidWorkload {
                problem: format!("prime range {domain:?} is empty"),
            });
        }

        Ok(Self { domain, batch_size })
    }

    /// Creates a workload over all numbers with exactly `digits` decimal digits,
    /// i.e. `[10^(digits-1), 10^digits)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidWorkload`] if the numbers do not fit in a `u64`.
    pub fn with_digits(digits: NonZero<u32>, batch_size: NonZero<u64>) -> Result<Self> {
        let too_large = || Error::InvalidWorkload {
            problem: format!(
                "{digits}-digit numbers do not fit in 64 bits, at most {MAX_PRIME_DIGITS} digits are supported"
            ),
        };

        let end = 10_u64.checked_pow(digits.get()).ok_or_else(too_large)?;
        let start = 10_u64
            .checked_pow(digits.get().saturating_sub(1))
            .ok_or_else(too_large)?;

        Self::new(start..end, batch_size)
    }

    /// The integers examined by this workload.
    #[must_use]
    pub fn domain(&self) -> &Range<u64> {
        &self.domain
    }

    /// The number of integers per batch.
    #[must_use]
    pub fn batch_size(&self) -> NonZero<u64> {
        self.batch_size
    }
}

impl Workload for PrimeRange {
    type Batch = Range<u64>;
    type Context = ();
    type Output = PrimeCount;

    fn partition(&self) -> Result<Vec<Range<u64>>> {
        let batches = partition_range(self.domain.clone(), self.batch_size);
        verify_range_cover(&self.domain, &batches)?;
        Ok(batches)
    }

    fn load_context(&self) -> Result<()> {
        Ok(())
    }

    fn process(_context: &(), batch: &Range<u64>) -> Result<PrimeCount> {
        Ok(PrimeCount::new(count_primes(batch.clone())))
    }
}

/// Whether `n` is prime, by trial division with odd divisors up to `⌊√n⌋`.
#[must_use]
pub fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }

    if n == 2 {
        return true;
    }

    if n % 2 == 0 {
        return false;
    }

    let mut divisor = 3_u64;

    while divisor
        .checked_mul(divisor)
        .is_some_and(|square| square <= n)
    {
        if n.checked_rem(divisor) == Some(0) {
            return false;
        }

        divisor = divisor.saturating_add(2);
    }

    true
}

/// Counts the primes in `range`.
#[must_use]
pub fn count_primes(range: Range<u64>) -> u64 {
    range.filter(|n| is_prime(*n)).map(|_| 1_u64).sum()
}

/// Name of the reference vocabulary file inside a corpus directory.
pub const REFERENCE_FILE_NAME: &str = "file_01.txt";

/// What the word workload does with a corpus file that cannot be read.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum UnreadableFilePolicy {
    /// Fail the run with [`Error::MissingInput`].
    #[default]
    Fail,

    /// Log a warning and treat the file as empty.
    Skip,
}

/// The set of tokens a word workload counts.
///
/// Cloning is cheap; all clones share the same token set.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Vocabulary {
    tokens: Arc<HashSet<String>>,
}

impl Vocabulary {
    /// Builds a vocabulary from the distinct tokens of `text`.
    ///
    /// Tokens are lower-cased unless `case_sensitive` is set.
    #[must_use]
    pub fn from_text(text: &str, case_sensitive: bool) -> Self {
        if case_sensitive {
            tokenize(text).collect()
        } else {
            tokenize(&text.to_lowercase()).collect()
        }
    }

    /// Whether `token` belongs to the vocabulary.
    #[must_use]
    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }

    /// The number of distinct tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the vocabulary has no tokens.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Vocabulary {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut tokens = HashSet::new();
        tokens.extend(iter.into_iter().map(Into::into));

        Self {
            tokens: Arc::new(tokens),
        }
    }
}

/// Splits `text` into maximal runs of word characters (alphanumeric or `_`).
pub fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|token| !token.is_empty())
}

/// Context shared by every batch of a [`WordFrequency`] workload.
#[derive(Clone, Debug)]
pub struct WordContext {
    vocabulary: Vocabulary,
    case_sensitive: bool,
    unreadable_files: UnreadableFilePolicy,
}

impl WordContext {
    /// The tokens being counted.
    #[must_use]
    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Counts vocabulary tokens in `text`.
    #[must_use]
    pub fn count_text(&self, text: &str) -> TokenCounts {
        let mut counts = TokenCounts::new();

        let lowered;
        let text = if self.case_sensitive {
            text
        } else {
            lowered = text.to_lowercase();
            &lowered
        };

        for token in tokenize(text) {
            if self.vocabulary.contains(token) {
                counts.record(token);
            }
        }

        counts
    }

    fn count_file(&self, path: &Path) -> Result<TokenCounts> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(self.count_text(&text)),
            Err(source) => match self.unreadable_files {
                UnreadableFilePolicy::Skip => {
                    warn!(path = %path.display(), error = %source, "skipping unreadable corpus file");
                    Ok(TokenCounts::new())
                }
                UnreadableFilePolicy::Fail => Err(Error::MissingInput {
                    path: path.to_path_buf(),
                    source,
                }),
            },
        }
    }
}

/// Counts occurrences of a reference vocabulary across a set of corpus files.
///
/// The vocabulary is the set of distinct tokens in the reference file. Only tokens in the
/// vocabulary are counted.
///
/// Every file must be valid UTF-8. A file that is not counts as unreadable and is handled by the
/// [`UnreadableFilePolicy`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WordFrequency {
    reference: PathBuf,
    files: Vec<PathBuf>,
    case_sensitive: bool,
    unreadable_files: UnreadableFilePolicy,
    files_per_batch: NonZero<usize>,
}

impl WordFrequency {
    /// Creates a case-insensitive workload counting the vocabulary of `reference` in `files`,
    /// one file per batch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidWorkload`] if `files` is empty.
    pub fn new(reference: impl Into<PathBuf>, files: Vec<PathBuf>) -> Result<Self> {
        if files.is_empty() {
            return Err(Error::InvalidWorkload {
                problem: "the word workload has no corpus files".to_string(),
            });
        }

        Ok(Self {
            reference: reference.into(),
            files,
            case_sensitive: false,
            unreadable_files: UnreadableFilePolicy::default(),
            files_per_batch: nz!(1),
        })
    }

    /// Creates a workload over a corpus directory: the reference is [`REFERENCE_FILE_NAME`] and
    /// the corpus is every other `*.txt` file in the directory, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingInput`] if the directory cannot be listed and
    /// [`Error::InvalidWorkload`] if it contains no corpus files.
    pub fn from_corpus_dir(dir: &Path) -> Result<Self> {
        let missing = |source| Error::MissingInput {
            path: dir.to_path_buf(),
            source,
        };

        let mut files = Vec::new();

        for entry in fs::read_dir(dir).map_err(missing)? {
            let path = entry.map_err(missing)?.path();

            let is_text = path.extension().is_some_and(|extension| extension == "txt");
            let is_reference = path
                .file_name()
                .is_some_and(|name| name == REFERENCE_FILE_NAME);

            if is_text && !is_reference && path.is_file() {
                files.push(path);
            }
        }

        files.sort();

        debug!(dir = %dir.display(), files = files.len(), "discovered corpus files");

        Self::new(dir.join(REFERENCE_FILE_NAME), files)
    }

    /// Sets whether tokens keep their letter case. Off by default.
    #[must_use]
    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Sets what happens when a corpus file cannot be read.
    #[must_use]
    pub fn unreadable_files(mut self, policy: UnreadableFilePolicy) -> Self {
        self.unreadable_files = policy;
        self
    }

    /// Sets how many consecutive files form one batch. One by default.
    #[must_use]
    pub fn files_per_batch(mut self, files_per_batch: NonZero<usize>) -> Self {
        self.files_per_batch = files_per_batch;
        self
    }

    /// The reference vocabulary file.
    #[must_use]
    pub fn reference(&self) -> &Path {
        &self.reference
    }

    /// The corpus files, in processing order.
    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

impl Workload for WordFrequency {
    type Batch = FileBatch;
    type Context = WordContext;
    type Output = TokenCounts;

    fn check_inputs(&self) -> Result<()> {
        let required = iter::once(&self.reference).chain(
            self.files
                .iter()
                .filter(|_| self.unreadable_files == UnreadableFilePolicy::Fail),
        );

        for path in required {
            if let Err(source) = fs::metadata(path) {
                return Err(Error::MissingInput {
                    path: path.clone(),
                    source,
                });
            }
        }

        Ok(())
    }

    fn partition(&self) -> Result<Vec<FileBatch>> {
        let batches = partition_files(&self.files, self.files_per_batch);
        verify_file_cover(&self.files, &batches)?;
        Ok(batches)
    }

    fn load_context(&self) -> Result<WordContext> {
        let text = fs::read_to_string(&self.reference).map_err(|source| Error::MissingInput {
            path: self.reference.clone(),
            source,
        })?;

        let vocabulary = Vocabulary::from_text(&text, self.case_sensitive);

        debug!(
            reference = %self.reference.display(),
            tokens = vocabulary.len(),
            "loaded reference vocabulary"
        );

        Ok(WordContext {
            vocabulary,
            case_sensitive: self.case_sensitive,
            unreadable_files: self.unreadable_files,
        })
    }

    fn process(context: &WordContext, batch: &FileBatch) -> Result<TokenCounts> {
        let mut counts = TokenCounts::new();

        for path in batch.paths() {
            counts = counts.merge(context.count_file(path)?);
        }

        Ok(counts)
    }
}
