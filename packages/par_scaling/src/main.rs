#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Runs a scaling sweep and prints the measurements with derived speedup and efficiency.
//!
//! ```text
//! par-scaling --workload primes --sizes 3-6 --workers 1-8
//! par-scaling --workload words --sizes 10,50,100 --output results.csv
//! par-scaling --workload words --sizes 10,20 --corpus-root /data/corpora
//! ```
//!
//! Set `RUST_LOG` to control log output, which goes to stderr (default `info`).

mod report;

use std::io;
use std::num::NonZero;
use std::path::PathBuf;
use std::process::ExitCode;

use argh::FromArgs;
use par_scaling::{
    BackendKind, Configuration, Error, MeasurementTable, PrimeCount, Result, RunOutcome, Sweep,
    SweepConfig, TokenCounts, UnreadableFilePolicy, WordFrequency, WorkloadKind, WorkloadSource,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::report::Report;

/// Measures how prime counting and word counting scale across sequential, message-passing and
/// task-graph execution.
#[derive(FromArgs)]
struct Args {
    /// TOML file with the sweep configuration; options below override it
    #[argh(option)]
    config: Option<PathBuf>,

    /// workload to measure (primes, words)
    #[argh(option)]
    workload: Option<WorkloadKind>,

    /// problem sizes as a list such as "3-5" or "10,50,100" (digits or corpus files)
    #[argh(option)]
    sizes: Option<String>,

    /// worker counts for the parallel backends, as a list such as "2-5"
    #[argh(option)]
    workers: Option<String>,

    /// comma-separated backends (sequential, message-passing, task-graph)
    #[argh(option)]
    backends: Option<String>,

    /// directory the synthetic corpus is generated in
    #[argh(option)]
    corpus_dir: Option<PathBuf>,

    /// count the existing corpora in <root>/<size> instead of generating one
    #[argh(option)]
    corpus_root: Option<PathBuf>,

    /// integers per batch for the prime workload
    #[argh(option)]
    batch_size: Option<NonZero<u64>>,

    /// match words with their letter case preserved
    #[argh(switch)]
    case_sensitive: bool,

    /// count unreadable corpus files as empty instead of failing the run
    #[argh(switch)]
    skip_unreadable: bool,

    /// how many of the most frequent words to print
    #[argh(option)]
    top: Option<usize>,

    /// file to write the measurement table to as CSV
    #[argh(option)]
    output: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<SweepConfig> {
        let mut config = match &self.config {
            Some(path) => SweepConfig::load(path)?,
            None => SweepConfig::default(),
        };

        if let Some(workload) = self.workload {
            config.workload = workload;
        }
        if let Some(sizes) = self.sizes {
            config.sizes = Some(sizes);
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(backends) = self.backends {
            config.backends = parse_backends(&backends)?;
        }
        if let Some(corpus_dir) = self.corpus_dir {
            config.corpus_dir = corpus_dir;
        }
        if let Some(corpus_root) = self.corpus_root {
            config.corpus_root = Some(corpus_root);
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if self.case_sensitive {
            config.case_sensitive = true;
        }
        if self.skip_unreadable {
            config.unreadable_files = UnreadableFilePolicy::Skip;
        }
        if let Some(top) = self.top {
            config.top = top;
        }
        if let Some(output) = self.output {
            config.output = Some(output);
        }

        Ok(config)
    }
}

fn parse_backends(list: &str) -> Result<Vec<BackendKind>> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            name.parse()
                .map_err(|problem| Error::InvalidConfig { problem })
        })
        .collect()
}

// Binary entry point - mutations would require subprocess testing which is impractical.
#[cfg_attr(test, mutants::skip)]
#[cfg_attr(coverage_nightly, coverage(off))]
fn main() -> ExitCode {
    let args: Args = argh::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    match args.into_config().and_then(|config| run(&config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "sweep aborted");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg_attr(test, mutants::skip)]
#[cfg_attr(coverage_nightly, coverage(off))]
fn run(config: &SweepConfig) -> Result<()> {
    let sweep = config.sweep()?;

    info!(
        workload = %config.workload,
        cells = sweep.cells().len(),
        "starting sweep"
    );

    let (table, size_header) = match config.workload {
        WorkloadKind::Primes => {
            let mut source = config.prime_digits();
            let table = sweep.execute_with(&mut source, print_prime_count);
            (table, "Digits")
        }
        WorkloadKind::Words => {
            let table = match config.existing_corpus() {
                Some(mut source) => count_words(&sweep, &mut source, config.top),
                None => count_words(&sweep, &mut config.synthetic_corpus()?, config.top),
            };
            (table, "Files")
        }
    };

    let report = Report::new(&table, size_header);
    println!();
    print!("{report}");

    if let Some(path) = &config.output {
        report.write_csv(path)?;
        info!(path = %path.display(), "measurements written");
    }

    Ok(())
}

fn count_words<S>(sweep: &Sweep, source: &mut S, top: usize) -> MeasurementTable
where
    S: WorkloadSource<Workload = WordFrequency>,
{
    sweep.execute_with(source, |cell, outcome| print_top_words(cell, outcome, top))
}

fn print_prime_count(cell: &Configuration, outcome: &Result<RunOutcome<PrimeCount>>) {
    if cell.backend() != BackendKind::Sequential {
        return;
    }

    if let Ok(run) = outcome {
        println!(
            "{} digits: {} primes",
            cell.problem_size(),
            run.result().get()
        );
    }
}

fn print_top_words(cell: &Configuration, outcome: &Result<RunOutcome<TokenCounts>>, top: usize) {
    if cell.backend() != BackendKind::Sequential {
        return;
    }

    if let Ok(run) = outcome {
        println!("{} files:", cell.problem_size());

        for (word, count) in run.result().top(top) {
            println!("  {word}: {count}");
        }
    }
}
