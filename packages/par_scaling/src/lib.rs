#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Measures how two embarrassingly parallel workloads scale across execution backends.
//!
//! The same computation is run on three backends and their wall-clock times are compared
//! against a single-threaded baseline:
//!
//! - [`Sequential`] - folds every batch on the calling thread. This is the baseline.
//! - [`MessagePassing`] - a fixed world of ranks. The coordinator (rank 0) statically assigns
//!   batches round-robin, every rank processes its share and sends back one partial result.
//! - [`TaskGraph`] - one task per batch, pulled from a shared queue by a pool of workers.
//!
//! Two workloads are provided:
//!
//! - [`PrimeRange`] - counts the primes in a half-open integer range.
//! - [`WordFrequency`] - counts occurrences of a reference vocabulary across a set of text files.
//!
//! Both produce partial results that merge associatively and commutatively (see
//! [`PartialResult`]), so every backend returns exactly the same answer regardless of worker
//! count or completion order.
//!
//! A [`Sweep`] runs a grid of problem sizes, backends and worker counts, recording one
//! [`Measurement`] per cell in a [`MeasurementTable`]. Speedup and efficiency are derived from
//! that table by [`speedup`], [`efficiency`] and [`scaling_points`].
//!
//! # Example
//!
//! ```
//! use new_zealand::nz;
//! use par_scaling::{BackendKind, PrimeCount, PrimeRange};
//!
//! let workload = PrimeRange::new(10..100, nz!(10)).unwrap();
//!
//! for backend in BackendKind::ALL {
//!     let outcome = backend.run(&workload, nz!(3)).unwrap();
//!     assert_eq!(outcome.result(), &PrimeCount::new(21));
//! }
//! ```
//!
//! # Workers and processors
//!
//! Worker threads are pinned to processors in the order reported by the platform, wrapping around
//! when there are more workers than processors. Ranks of the message-passing world are threads in
//! this process, not separate operating system processes.

mod backend;
mod config;
mod corpus;
mod error;
mod metrics;
mod partial;
mod partition;
mod placement;
mod sweep;
mod workload;

pub use backend::*;
pub use config::*;
pub use corpus::*;
pub use error::*;
pub use metrics::*;
pub use partial::*;
pub use partition::*;
pub use sweep::*;
pub use workload::*;
