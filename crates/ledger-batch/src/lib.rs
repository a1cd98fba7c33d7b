//! Ledger Batch
//!
//! Chunked, fault-tolerant loading of delimited account, transaction and
//! annual summary files into a transactional store.
//!
//! # Pipeline
//!
//! ```text
//! RecordSource -> FieldMapper -> RetryController(Domain) -> SkipPolicy
//!              -> ChunkBuilder -> WorkerPool -> UpsertWriter -> EntityStore
//! ```
//!
//! Every stage reports to an [`ExecutionReporter`](report::ExecutionReporter)
//! and a [`PipelineObserver`](observer::PipelineObserver); the job ends with an
//! [`ExecutionReport`](report::ExecutionReport).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ledger_batch::{BatchConfig, BatchRunner, JobKind, MemoryStore, RunParameters};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = BatchConfig::from_env()?;
//! let runner = BatchRunner::new(config, Arc::new(MemoryStore::new()));
//! let reports = runner.run_all(&JobKind::ALL, &RunParameters::default()).await?;
//! for report in &reports {
//!     println!("{}: {}", report.job, report.status);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod chunk;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod jobs;
pub mod mapper;
pub mod observer;
pub mod orchestrator;
pub mod policy;
pub mod pool;
pub mod report;
pub mod retry;
pub mod source;
pub mod store;
pub mod writer;

pub use config::{BatchConfig, JobSettings};
pub use error::{PipelineError, RecordError, StoreError};
pub use jobs::{BatchRunner, JobKind, RunParameters};
pub use observer::{PipelineEvent, PipelineObserver, TracingObserver};
pub use orchestrator::ChunkOrchestrator;
pub use report::{ExecutionReport, JobStatus};
pub use store::{EntityStore, MemoryStore};
#[cfg(feature = "database")]
pub use store::PgEntityStore;
