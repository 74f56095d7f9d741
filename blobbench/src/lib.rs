//! Measure write and read latency of blob-sized records on two storage backends:
//! plain files (one per record) and an embedded ordered key-value store.
//!
//! # Usage
//!
//! 1. Build a [`BenchmarkConfig`].
//! 2. Hand it to an [`Orchestrator`] and [`run`](Orchestrator::run) it on a tokio runtime.
//! 3. Turn each phase's batch timings into [`Stats`] with [`PhaseOutcome::stats`].
//!
//! ```no_run
//! # async fn example() -> Result<(), blobbench::Error> {
//! let config = blobbench::BenchmarkConfig::builder()
//!     .total_records(10_000)
//!     .worker_count(8)
//!     .build()?;
//! let results = blobbench::Orchestrator::new(config).run().await?;
//! for outcome in results.iter() {
//!     println!("{}: {:?}", outcome.phase, outcome.stats()?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # How a phase is measured
//!
//! A phase is one operation kind (write or read) against one backend. The
//! records `[0, total_records)` are split into one contiguous range per worker
//! (see [`partition()`]). Workers run in parallel and never share state; each
//! opens its own store handle, for the key-value store even its own database.
//!
//! A worker walks its range in batches of `batch_size` records. All operations
//! of a batch are issued at once and the batch's elapsed time, from dispatch
//! until the slowest operation returned, is one timing sample. Batches of one
//! worker never overlap.
//!
//! Throughput in [`Stats`] is `total_ops / sum(batch timings)`. Because the
//! batches of different workers overlap, this is not the same as dividing by
//! the wall-clock duration of the phase; [`PhaseOutcome::wall_throughput_ops_per_sec`]
//! gives the latter.

pub mod backend;
pub mod config;
mod error;
pub mod orchestrator;
pub mod partition;
pub mod stats;
pub mod worker;

pub use config::{BenchmarkConfig, ConfigBuilder};
pub use error::{BackendError, CleanupError, Error};
pub use orchestrator::{OpKind, Orchestrator, Phase, PhaseOutcome, ResultSet};
pub use partition::{partition, WorkAssignment};
pub use stats::{aggregate, Stats};
