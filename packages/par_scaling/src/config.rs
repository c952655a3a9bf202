//! Sweep configuration, loaded from TOML.

use std::fmt;
use std::fs;
use std::num::NonZero;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{
    BackendKind, CorpusWorkloads, DEFAULT_PRIME_BATCH_SIZE, Error, PrimeDigits, Result, Sweep,
    SyntheticCorpus, UnreadableFilePolicy, WordOptions,
};

/// Which workload a sweep measures.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[expect(
    clippy::exhaustive_enums,
    reason = "callers dispatch on the workload and there are exactly two"
)]
pub enum WorkloadKind {
    /// Prime counting; problem sizes are digit counts.
    #[default]
    Primes,

    /// Vocabulary counting over a generated corpus; problem sizes are corpus file counts.
    Words,
}

impl WorkloadKind {
    fn default_sizes(self) -> &'static str {
        match self {
            Self::Primes => "3-5",
            Self::Words => "10,50,100",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Primes => "primes",
            Self::Words => "words",
        })
    }
}

impl FromStr for WorkloadKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primes" | "prime" => Ok(Self::Primes),
            "words" | "word" => Ok(Self::Words),
            _ => Err(format!("unknown workload '{s}', expected 'primes' or 'words'")),
        }
    }
}

/// Everything needed to run a sweep.
///
/// Every field has a default, so a configuration file only needs to name what it changes:
///
/// ```toml
/// workload = "words"
/// sizes = "10,50,100"
/// workers = "2-4"
/// backends = ["sequential", "task-graph"]
/// ```
///
/// Problem sizes and worker counts are written as cpulist strings such as `"1-4"`, `"2,4,8"` or
/// `"10-100:10"`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
#[non_exhaustive]
pub struct SweepConfig {
    /// The workload to measure.
    pub workload: WorkloadKind,

    /// Problem sizes as a cpulist. Defaults depend on the workload.
    pub sizes: Option<String>,

    /// Worker counts for the parallel backends, as a cpulist.
    pub workers: String,

    /// Backends to measure.
    pub backends: Vec<BackendKind>,

    /// Integers per batch for the prime workload.
    pub batch_size: NonZero<u64>,

    /// Directory the synthetic corpus is generated in.
    pub corpus_dir: PathBuf,

    /// Directory holding an existing corpus per problem size, as `<root>/<size>`. When set, the
    /// word workload counts these corpora and nothing is generated.
    pub corpus_root: Option<PathBuf>,

    /// Smallest number of words in a generated corpus file.
    pub min_words: usize,

    /// Largest number of words in a generated corpus file.
    pub max_words: usize,

    /// Random seed for corpus generation.
    pub seed: u64,

    /// Whether word matching keeps letter case.
    pub case_sensitive: bool,

    /// What to do with corpus files that cannot be read.
    pub unreadable_files: UnreadableFilePolicy,

    /// How many of the most frequent words to report.
    pub top: usize,

    /// Where to write the measurement table as CSV, if anywhere.
    pub output: Option<PathBuf>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            workload: WorkloadKind::default(),
            sizes: None,
            workers: "2-5".to_string(),
            backends: BackendKind::ALL.to_vec(),
            batch_size: DEFAULT_PRIME_BATCH_SIZE,
            corpus_dir: PathBuf::from("corpus"),
            corpus_root: None,
            min_words: 5_000,
            max_words: 6_000,
            seed: 42,
            case_sensitive: false,
            unreadable_files: UnreadableFilePolicy::default(),
            top: 5,
            output: None,
        }
    }
}

impl SweepConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the text is not valid TOML or names unknown fields.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|error| Error::InvalidConfig {
            problem: error.to_string(),
        })
    }

    /// Loads a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and [`Error::InvalidConfig`] if its
    /// contents are invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml_str(&text)
    }

    /// The problem sizes to measure, ascending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the list is malformed, empty or contains zero.
    pub fn problem_sizes(&self) -> Result<Vec<u64>> {
        let sizes = self
            .sizes
            .as_deref()
            .unwrap_or_else(|| self.workload.default_sizes());

        Ok(parse_positive_list("sizes", sizes)?
            .into_iter()
            .map(u64::from)
            .collect())
    }

    /// The worker counts to measure the parallel backends with, ascending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the list is malformed, empty or contains zero.
    pub fn worker_counts(&self) -> Result<Vec<NonZero<usize>>> {
        parse_positive_list("workers", &self.workers)?
            .into_iter()
            .map(|count| {
                usize::try_from(count)
                    .ok()
                    .and_then(NonZero::new)
                    .ok_or_else(|| Error::InvalidConfig {
                        problem: format!("{count} is not a usable worker count"),
                    })
            })
            .collect()
    }

    /// Builds the sweep grid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if any list is malformed or empty.
    pub fn sweep(&self) -> Result<Sweep> {
        Sweep::new(
            self.problem_sizes()?,
            self.backends.iter().copied(),
            self.worker_counts()?,
        )
    }

    /// The source of prime workloads described by this configuration.
    #[must_use]
    pub fn prime_digits(&self) -> PrimeDigits {
        PrimeDigits::new(self.batch_size)
    }

    /// The options applied to every word workload.
    #[must_use]
    pub fn word_options(&self) -> WordOptions {
        WordOptions {
            case_sensitive: self.case_sensitive,
            unreadable_files: self.unreadable_files,
        }
    }

    /// The existing corpora to count, if `corpus_root` is set.
    #[must_use]
    pub fn existing_corpus(&self) -> Option<CorpusWorkloads> {
        self.corpus_root
            .as_ref()
            .map(|root| CorpusWorkloads::new(root, self.word_options()))
    }

    /// The synthetic corpus generator described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `min_words` exceeds `max_words`.
    pub fn synthetic_corpus(&self) -> Result<SyntheticCorpus> {
        Ok(SyntheticCorpus::new(&self.corpus_dir)
            .words_per_file(self.min_words..=self.max_words)?
            .seed(self.seed)
            .options(self.word_options()))
    }
}

fn parse_positive_list(field: &str, list: &str) -> Result<Vec<u32>> {
    let items = cpulist::parse(list).map_err(|error| Error::InvalidConfig {
        problem: format!("{field}: {error}"),
    })?;

    if items.is_empty() {
        return Err(Error::InvalidConfig {
            problem: format!("{field}: the list is empty"),
        });
    }

    if items.contains(&0) {
        return Err(Error::InvalidConfig {
            problem: format!("{field}: zero is not allowed"),
        });
    }

    Ok(items)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;

    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = SweepConfig::from_toml_str("").unwrap();

        assert_eq!(config, SweepConfig::default());
        assert_eq!(config.problem_sizes().unwrap(), vec![3, 4, 5]);
        assert_eq!(
            config.worker_counts().unwrap(),
            vec![nz!(2), nz!(3), nz!(4), nz!(5)]
        );
    }

    #[test]
    fn default_sizes_follow_workload() {
        let config = SweepConfig::from_toml_str(r#"workload = "words""#).unwrap();

        assert_eq!(config.problem_sizes().unwrap(), vec![10, 50, 100]);
    }

    #[test]
    fn full_file_parses() {
        let config = SweepConfig::from_toml_str(
            r#"
            workload = "words"
            sizes = "10-30:10"
            workers = "1,4"
            backends = ["sequential", "mpi", "task-graph"]
            batch_size = 100
            corpus_dir = "/tmp/corpus"
            min_words = 10
            max_words = 20
            seed = 7
            case_sensitive = true
            unreadable_files = "skip"
            top = 3
            output = "results.csv"
            "#,
        )
        .unwrap();

        assert_eq!(config.workload, WorkloadKind::Words);
        assert_eq!(config.problem_sizes().unwrap(), vec![10, 20, 30]);
        assert_eq!(config.worker_counts().unwrap(), vec![nz!(1), nz!(4)]);
        assert_eq!(config.backends, BackendKind::ALL.to_vec());
        assert_eq!(config.batch_size, nz!(100));
        assert_eq!(config.unreadable_files, UnreadableFilePolicy::Skip);
        assert!(config.word_options().case_sensitive);
        assert_eq!(config.output.as_deref(), Some(Path::new("results.csv")));
        assert_eq!(config.sweep().unwrap().cells().len(), 3 * (1 + 2 * 2));
    }

    #[test]
    fn corpus_root_selects_existing_corpus() {
        assert_eq!(SweepConfig::default().existing_corpus(), None);

        let config = SweepConfig::from_toml_str(
            r#"
            workload = "words"
            corpus_root = "/data/corpora"
            case_sensitive = true
            "#,
        )
        .unwrap();

        let source = config.existing_corpus().unwrap();
        assert_eq!(source.dir_for(10), Path::new("/data/corpora/10"));
        assert_eq!(
            source,
            CorpusWorkloads::new("/data/corpora", config.word_options())
        );
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert!(matches!(
            SweepConfig::from_toml_str("threads = 4"),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        assert!(matches!(
            SweepConfig::from_toml_str("batch_size = 0"),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn zero_and_malformed_lists_are_rejected() {
        let mut config = SweepConfig::default();

        config.workers = "0-2".to_string();
        assert!(matches!(
            config.worker_counts(),
            Err(Error::InvalidConfig { .. })
        ));

        config.workers = "two".to_string();
        assert!(matches!(
            config.worker_counts(),
            Err(Error::InvalidConfig { .. })
        ));

        config.sizes = Some(String::new());
        assert!(matches!(
            config.problem_sizes(),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn inverted_word_range_is_rejected() {
        let mut config = SweepConfig::default();
        config.min_words = 10;
        config.max_words = 5;

        assert!(matches!(
            config.synthetic_corpus(),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn workload_kind_parses() {
        assert_eq!("Words".parse(), Ok(WorkloadKind::Words));
        assert_eq!("primes".parse(), Ok(WorkloadKind::Primes));
        assert!("pi".parse::<WorkloadKind>().is_err());
        assert_eq!(WorkloadKind::Words.to_string(), "words");
    }
}
