//! Batch configuration
//!
//! Every knob has a compiled-in default and a `BATCH_*` environment override.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::jobs::JobKind;

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_DELIMITER: char = ',';
pub const DEFAULT_CORE_WORKERS: usize = 3;
pub const DEFAULT_MAX_WORKERS: usize = 5;
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;
pub const DEFAULT_SKIP_LIMIT: u64 = 100;
pub const DEFAULT_RETRY_LIMIT: u32 = 3;
pub const DEFAULT_COMMIT_RETRIES: u32 = 1;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;
pub const DEFAULT_CHUNK_SIZE: usize = 5;
pub const DEFAULT_CHUNK_SIZE_TRANSACTIONS: usize = 10;
pub const DEFAULT_CHUNK_SIZE_INTERESTS: usize = 5;
pub const DEFAULT_CHUNK_SIZE_ANNUAL: usize = 8;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

/// Records per chunk, per job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkSizes {
    pub transactions: usize,
    pub interests: usize,
    pub annual: usize,
}

impl Default for ChunkSizes {
    fn default() -> Self {
        Self {
            transactions: DEFAULT_CHUNK_SIZE_TRANSACTIONS,
            interests: DEFAULT_CHUNK_SIZE_INTERESTS,
            annual: DEFAULT_CHUNK_SIZE_ANNUAL,
        }
    }
}

impl ChunkSizes {
    pub fn for_job(&self, kind: JobKind) -> usize {
        match kind {
            JobKind::Transactions => self.transactions,
            JobKind::Interests => self.interests,
            JobKind::Annual => self.annual,
        }
    }
}

/// Connection settings for the PostgreSQL store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Tuning shared by every job of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Directory holding the input files
    pub data_dir: PathBuf,
    /// Field delimiter of the input files
    pub delimiter: u8,
    pub core_workers: usize,
    pub max_workers: usize,
    /// Chunks that may wait for a worker before the dispatcher writes inline
    pub queue_capacity: usize,
    /// Skippable errors tolerated per job
    pub skip_limit: u64,
    /// Validator attempts for retryable errors
    pub retry_limit: u32,
    /// Extra attempts after a chunk commit fails
    pub commit_retries: u32,
    pub shutdown_grace_secs: u64,
    pub chunk_sizes: ChunkSizes,
    pub database: Option<DatabaseConfig>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            delimiter: DEFAULT_DELIMITER as u8,
            core_workers: DEFAULT_CORE_WORKERS,
            max_workers: DEFAULT_MAX_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            skip_limit: DEFAULT_SKIP_LIMIT,
            retry_limit: DEFAULT_RETRY_LIMIT,
            commit_retries: DEFAULT_COMMIT_RETRIES,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            chunk_sizes: ChunkSizes::default(),
            database: None,
        }
    }
}

impl BatchConfig {
    /// Load configuration from environment variables (after reading `.env`).
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let delimiter = match std::env::var("BATCH_DELIMITER") {
            Ok(raw) => parse_delimiter(&raw)?,
            Err(_) => defaults.delimiter,
        };

        let database = match std::env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => Some(DatabaseConfig {
                url,
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
            }),
            _ => None,
        };

        let config = Self {
            data_dir: std::env::var("BATCH_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            delimiter,
            core_workers: env_or("BATCH_CORE_WORKERS", DEFAULT_CORE_WORKERS)?,
            max_workers: env_or("BATCH_MAX_WORKERS", DEFAULT_MAX_WORKERS)?,
            queue_capacity: env_or("BATCH_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?,
            skip_limit: env_or("BATCH_SKIP_LIMIT", DEFAULT_SKIP_LIMIT)?,
            retry_limit: env_or("BATCH_RETRY_LIMIT", DEFAULT_RETRY_LIMIT)?,
            commit_retries: env_or("BATCH_COMMIT_RETRIES", DEFAULT_COMMIT_RETRIES)?,
            shutdown_grace_secs: env_or("BATCH_SHUTDOWN_GRACE_SECS", DEFAULT_SHUTDOWN_GRACE_SECS)?,
            chunk_sizes: ChunkSizes {
                transactions: env_or(
                    "BATCH_CHUNK_SIZE_TRANSACTIONS",
                    DEFAULT_CHUNK_SIZE_TRANSACTIONS,
                )?,
                interests: env_or("BATCH_CHUNK_SIZE_INTERESTS", DEFAULT_CHUNK_SIZE_INTERESTS)?,
                annual: env_or("BATCH_CHUNK_SIZE_ANNUAL", DEFAULT_CHUNK_SIZE_ANNUAL)?,
            },
            database,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.core_workers == 0 {
            anyhow::bail!("BATCH_CORE_WORKERS must be greater than 0");
        }
        if self.max_workers < self.core_workers {
            anyhow::bail!(
                "BATCH_MAX_WORKERS ({}) must be at least BATCH_CORE_WORKERS ({})",
                self.max_workers,
                self.core_workers
            );
        }
        if self.queue_capacity == 0 {
            anyhow::bail!("BATCH_QUEUE_CAPACITY must be greater than 0");
        }
        if self.retry_limit == 0 {
            anyhow::bail!("BATCH_RETRY_LIMIT must be at least 1");
        }
        for kind in JobKind::ALL {
            if self.chunk_sizes.for_job(kind) == 0 {
                anyhow::bail!("chunk size for {} must be greater than 0", kind);
            }
        }
        if let Some(db) = &self.database {
            if db.max_connections == 0 {
                anyhow::bail!("DATABASE_MAX_CONNECTIONS must be greater than 0");
            }
        }
        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Path of the input file for `kind`
    pub fn input_path(&self, kind: JobKind) -> PathBuf {
        self.data_dir.join(kind.file_name())
    }

    /// Settings handed to the orchestrator for one job
    pub fn job_settings(&self, kind: JobKind) -> JobSettings {
        JobSettings {
            chunk_size: self.chunk_sizes.for_job(kind),
            delimiter: self.delimiter,
            skip_limit: self.skip_limit,
            retry_limit: self.retry_limit,
            commit_retries: self.commit_retries,
            core_workers: self.core_workers,
            max_workers: self.max_workers,
            queue_capacity: self.queue_capacity,
            shutdown_grace: self.shutdown_grace(),
        }
    }
}

/// Per-job view of [`BatchConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSettings {
    pub chunk_size: usize,
    pub delimiter: u8,
    pub skip_limit: u64,
    pub retry_limit: u32,
    pub commit_retries: u32,
    pub core_workers: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
    pub shutdown_grace: Duration,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            delimiter: DEFAULT_DELIMITER as u8,
            skip_limit: DEFAULT_SKIP_LIMIT,
            retry_limit: DEFAULT_RETRY_LIMIT,
            commit_retries: DEFAULT_COMMIT_RETRIES,
            core_workers: DEFAULT_CORE_WORKERS,
            max_workers: DEFAULT_MAX_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
        }
    }
}

impl JobSettings {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_skip_limit(mut self, skip_limit: u64) -> Self {
        self.skip_limit = skip_limit;
        self
    }

    pub fn with_workers(mut self, core: usize, max: usize, queue_capacity: usize) -> Self {
        self.core_workers = core;
        self.max_workers = max;
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_commit_retries(mut self, commit_retries: u32) -> Self {
        self.commit_retries = commit_retries;
        self
    }
}

fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}

fn parse_delimiter(raw: &str) -> anyhow::Result<u8> {
    match raw {
        "\\t" | "tab" => Ok(b'\t'),
        s if s.len() == 1 && s.is_ascii() => Ok(s.as_bytes()[0]),
        s => anyhow::bail!("BATCH_DELIMITER must be a single ASCII character, got '{s}'"),
    }
}
