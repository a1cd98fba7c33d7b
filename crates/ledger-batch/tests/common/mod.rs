//! Shared helpers for the ledger-batch integration tests
//!
//! - input files written to a temporary data directory
//! - an observer that records every pipeline event
//! - a PostgreSQL container with migrations applied (feature `database`)

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use ledger_batch::config::BatchConfig;
use ledger_batch::{JobKind, JobSettings, PipelineEvent, PipelineObserver, RunParameters};
use tempfile::TempDir;

pub const TRANSACTION_HEADER: &str = "id,fecha,monto,tipo";
pub const ACCOUNT_HEADER: &str = "cuenta_id,nombre,saldo,edad,tipo";
pub const ANNUAL_HEADER: &str = "cuenta_id,fecha,transaccion,monto,descripcion";

/// Route `tracing` output through the test harness; safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("ledger_batch=debug")
        .with_test_writer()
        .try_init();
}

/// Fixed reference day so date rules do not drift with the calendar
pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 15).unwrap_or_default()
}

pub fn params() -> RunParameters {
    RunParameters::default().with_today(today())
}

/// Temporary data directory holding the job input files
pub struct DataDir {
    dir: TempDir,
}

impl DataDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}")),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write the input file for `kind` with `header` and `lines`
    pub fn write(&self, kind: JobKind, header: &str, lines: &[&str]) -> PathBuf {
        let path = self.dir.path().join(kind.file_name());
        let mut file = std::fs::File::create(&path).unwrap_or_else(|e| panic!("create {kind}: {e}"));
        writeln!(file, "{header}").unwrap_or_else(|e| panic!("write {kind}: {e}"));
        for line in lines {
            writeln!(file, "{line}").unwrap_or_else(|e| panic!("write {kind}: {e}"));
        }
        path
    }

    pub fn config(&self) -> BatchConfig {
        BatchConfig {
            data_dir: self.path().to_path_buf(),
            ..BatchConfig::default()
        }
    }
}

/// Transactions numbered from `first`, all valid and dated on [`today`]
pub fn transaction_lines(first: usize, count: usize) -> Vec<String> {
    (first..first + count)
        .map(|n| format!("T{n:04},2024-06-10,{}.50,credito", n * 10))
        .collect()
}

pub fn settings(chunk_size: usize) -> JobSettings {
    JobSettings::default()
        .with_chunk_size(chunk_size)
        .with_workers(2, 3, 4)
}

/// Owned copy of a [`PipelineEvent`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    JobStarted,
    ChunkCommitted { chunk: u64, written: u64, failed: u64 },
    ChunkRolledBack { chunk: u64, attempt: u32 },
    RecordSkipped { line: u64, reason: String },
    RecordRetried { line: u64, retries: u32 },
    AnomalyDetected { key: String, anomaly: String },
    JobFinished { status: String },
}

#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Recorded>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, matches: impl Fn(&Recorded) -> bool) -> usize {
        self.events().iter().filter(|e| matches(e)).count()
    }
}

impl PipelineObserver for RecordingObserver {
    fn on_event(&self, event: &PipelineEvent<'_>) {
        let recorded = match *event {
            PipelineEvent::JobStarted { .. } => Recorded::JobStarted,
            PipelineEvent::ChunkCommitted {
                chunk,
                written,
                failed,
                ..
            } => Recorded::ChunkCommitted {
                chunk,
                written,
                failed,
            },
            PipelineEvent::ChunkRolledBack { chunk, attempt, .. } => Recorded::ChunkRolledBack { chunk, attempt },
            PipelineEvent::RecordSkipped { line, reason, .. } => Recorded::RecordSkipped {
                line,
                reason: reason.to_string(),
            },
            PipelineEvent::RecordRetried { line, retries, .. } => Recorded::RecordRetried { line, retries },
            PipelineEvent::AnomalyDetected { key, anomaly, .. } => Recorded::AnomalyDetected {
                key: key.to_string(),
                anomaly: anomaly.to_string(),
            },
            PipelineEvent::JobFinished { report } => Recorded::JobFinished {
                status: report.status.to_string(),
            },
        };
        if let Ok(mut events) = self.events.lock() {
            events.push(recorded);
        }
    }
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

#[cfg(feature = "database")]
pub use postgres::TestPostgres;

#[cfg(feature = "database")]
mod postgres {
    use anyhow::{Context, Result};
    use ledger_batch::PgEntityStore;
    use testcontainers::core::IntoContainerPort;
    use testcontainers::runners::AsyncRunner;
    use testcontainers::{ContainerAsync, ImageExt};
    use testcontainers_modules::postgres::Postgres;
    use tracing::info;

    /// PostgreSQL container with the ledger tables created
    pub struct TestPostgres {
        _container: ContainerAsync<Postgres>,
        store: PgEntityStore,
    }

    impl TestPostgres {
        pub async fn start() -> Result<Self> {
            info!("Starting PostgreSQL test container...");
            let container = Postgres::default()
                .with_tag("16-alpine")
                .start()
                .await
                .context("Failed to start PostgreSQL container")?;

            let host = container.get_host().await.context("Failed to get container host")?;
            let port = container
                .get_host_port_ipv4(5432.tcp())
                .await
                .context("Failed to get container port")?;
            let url = format!("postgresql://postgres:postgres@{host}:{port}/postgres");

            let store = PgEntityStore::connect(&url, 5)
                .await
                .context("Failed to connect to PostgreSQL")?;
            store.migrate().await.context("Failed to run migrations")?;

            Ok(Self {
                _container: container,
                store,
            })
        }

        pub fn store(&self) -> PgEntityStore {
            self.store.clone()
        }
    }
}
