//! Sources that provide a workload for each problem size of a sweep.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::num::NonZero;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use rand::rngs::SmallRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::{
    DEFAULT_PRIME_BATCH_SIZE, Error, PrimeRange, REFERENCE_FILE_NAME, Result,
    UnreadableFilePolicy, WordFrequency, Workload,
};

/// Provides the workload for a given problem size, preparing any input data it needs first.
pub trait WorkloadSource {
    /// The kind of workload provided.
    type Workload: Workload;

    /// Ensures the input for `problem_size` exists and returns a workload over it.
    ///
    /// Called once per grid cell, so implementations should avoid redoing expensive
    /// preparation when consecutive calls ask for the same size.
    ///
    /// # Errors
    ///
    /// Returns an error if the input cannot be prepared or the problem size is not meaningful
    /// for this source.
    fn prepare(&mut self, problem_size: u64) -> Result<Self::Workload>;
}

/// Prime workloads where the problem size is the number of decimal digits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PrimeDigits {
    batch_size: NonZero<u64>,
}

impl PrimeDigits {
    /// Creates a source whose workloads use the given batch size.
    #[must_use]
    pub fn new(batch_size: NonZero<u64>) -> Self {
        Self { batch_size }
    }
}

impl Default for PrimeDigits {
    fn default() -> Self {
        Self::new(DEFAULT_PRIME_BATCH_SIZE)
    }
}

impl WorkloadSource for PrimeDigits {
    type Workload = PrimeRange;

    fn prepare(&mut self, problem_size: u64) -> Result<PrimeRange> {
        let digits = u32::try_from(problem_size)
            .ok()
            .and_then(NonZero::new)
            .ok_or_else(|| Error::InvalidConfig {
                problem: format!("{problem_size} is not a valid digit count"),
            })?;

        PrimeRange::with_digits(digits, self.batch_size)
    }
}

/// Options shared by every word workload a source creates.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct WordOptions {
    /// Whether tokens keep their letter case.
    pub case_sensitive: bool,

    /// What to do with corpus files that cannot be read.
    pub unreadable_files: UnreadableFilePolicy,
}

impl WordOptions {
    fn apply(self, workload: WordFrequency) -> WordFrequency {
        workload
            .case_sensitive(self.case_sensitive)
            .unreadable_files(self.unreadable_files)
    }
}

/// Word workloads over existing corpus directories, one per problem size.
///
/// The corpus for problem size `n` is the directory `<root>/<n>`, laid out as described in
/// [`WordFrequency::from_corpus_dir`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CorpusWorkloads {
    root: PathBuf,
    options: WordOptions,
}

impl CorpusWorkloads {
    /// Creates a source that looks for corpus directories under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, options: WordOptions) -> Self {
        Self {
            root: root.into(),
            options,
        }
    }

    /// The directory holding the corpus for `problem_size`.
    #[must_use]
    pub fn dir_for(&self, problem_size: u64) -> PathBuf {
        self.root.join(problem_size.to_string())
    }
}

impl WorkloadSource for CorpusWorkloads {
    type Workload = WordFrequency;

    fn prepare(&mut self, problem_size: u64) -> Result<WordFrequency> {
        let workload = WordFrequency::from_corpus_dir(&self.dir_for(problem_size))?;
        Ok(self.options.apply(workload))
    }
}

/// Words the synthetic corpus is made of.
const WORDS: &[&str] = &[
    "agua", "amigo", "año", "árbol", "azul", "barco", "bosque", "calle", "camino", "campo",
    "casa", "cielo", "ciudad", "coche", "corazón", "día", "escuela", "estrella", "familia",
    "fuego", "gato", "hermano", "hombre", "idea", "isla", "jardín", "libro", "luna", "luz",
    "madre", "mano", "mar", "mesa", "montaña", "mujer", "mundo", "música", "niño", "noche",
    "nube", "ojo", "padre", "palabra", "pan", "papel", "perro", "piedra", "playa", "pueblo",
    "puerta", "río", "sol", "sueño", "tiempo", "tierra", "trabajo", "tren", "verdad", "viento",
    "vida",
];

/// How many distinct words the reference vocabulary holds.
const REFERENCE_WORDS: usize = 20;

/// Writes a reproducible random corpus into a directory and provides word workloads over it.
///
/// The problem size is the number of corpus files, not counting the reference file. The corpus is
/// only regenerated when the requested size changes, so every backend measured at one size sees
/// identical input.
#[derive(Debug)]
pub struct SyntheticCorpus {
    dir: PathBuf,
    words_per_file: RangeInclusive<usize>,
    seed: u64,
    options: WordOptions,
    generated_for: Option<u64>,
}

impl SyntheticCorpus {
    /// Creates a generator that writes into `dir`, creating it if necessary.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            words_per_file: 5_000..=6_000,
            seed: 42,
            options: WordOptions::default(),
            generated_for: None,
        }
    }

    /// Sets the range the number of words per corpus file is drawn from.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the range is empty.
    pub fn words_per_file(mut self, words: RangeInclusive<usize>) -> Result<Self> {
        if words.is_empty() {
            return Err(Error::InvalidConfig {
                problem: format!("words per file range {words:?} is empty"),
            });
        }

        self.words_per_file = words;
        Ok(self)
    }

    /// Sets the random seed. The same seed and size always produce the same corpus.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the options applied to the word workloads this source creates.
    #[must_use]
    pub fn options(mut self, options: WordOptions) -> Self {
        self.options = options;
        self
    }

    /// The directory the corpus is written to.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Replaces any previous corpus with a reference file and `file_count` corpus files.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the directory cannot be prepared or a file cannot be written.
    pub fn generate(&mut self, file_count: NonZero<usize>) -> Result<()> {
        self.generated_for = None;

        fs::create_dir_all(&self.dir).map_err(|source| Error::Io {
            path: self.dir.clone(),
            source,
        })?;

        self.remove_previous()?;

        let mut rng = SmallRng::seed_from_u64(self.seed);

        let vocabulary = WORDS.choose_multiple(&mut rng, REFERENCE_WORDS).copied();
        write_words(&self.dir.join(REFERENCE_FILE_NAME), vocabulary)?;

        for index in 2..=file_count.get().saturating_add(1) {
            let word_count = rng.random_range(self.words_per_file.clone());
            let words = (0..word_count).filter_map(|_| WORDS.choose(&mut rng).copied());

            write_words(&self.dir.join(format!("file_{index:02}.txt")), words)?;
        }

        info!(dir = %self.dir.display(), files = file_count.get(), "generated synthetic corpus");

        self.generated_for = u64::try_from(file_count.get()).ok();

        Ok(())
    }

    fn remove_previous(&self) -> Result<()> {
        let io_error = |source| Error::Io {
            path: self.dir.clone(),
            source,
        };

        for entry in fs::read_dir(&self.dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();

            let is_generated = path.file_name().and_then(|name| name.to_str()).is_some_and(
                |name| name.starts_with("file_") && name.ends_with(".txt"),
            );

            if is_generated {
                fs::remove_file(&path).map_err(|source| Error::Io {
                    path: path.clone(),
                    source,
                })?;
            }
        }

        Ok(())
    }
}

/// Writes `words` separated by spaces, twelve to a line.
fn write_words<'a>(path: &Path, words: impl IntoIterator<Item = &'a str>) -> Result<()> {
    let io_error = |source| Error::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = BufWriter::new(File::create(path).map_err(io_error)?);
    let mut written = 0_usize;

    for word in words {
        let separator = if written % 12 == 11 { "\n" } else { " " };
        write!(writer, "{word}{separator}").map_err(io_error)?;
        written = written.saturating_add(1);
    }

    writer.flush().map_err(io_error)?;

    debug!(path = %path.display(), words = written, "wrote corpus file");

    Ok(())
}

impl WorkloadSource for SyntheticCorpus {
    type Workload = WordFrequency;

    fn prepare(&mut self, problem_size: u64) -> Result<WordFrequency> {
        if self.generated_for != Some(problem_size) {
            let file_count = usize::try_from(problem_size)
                .ok()
                .and_then(NonZero::new)
                .ok_or_else(|| Error::InvalidConfig {
                    problem: format!("{problem_size} is not a valid corpus file count"),
                })?;

            self.generate(file_count)?;
        }

        let workload = WordFrequency::from_corpus_dir(&self.dir)?;
        Ok(self.options.apply(workload))
    }
}
