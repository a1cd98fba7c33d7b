//! Execution reporting
//!
//! [`ExecutionReporter`] is shared by the dispatcher and every chunk worker.
//! Counters are atomics; the finished [`ExecutionReport`] is a plain value.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    NotStarted,
    Running,
    Completed,
    PartiallyCompleted,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::NotStarted => "not_started",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::PartiallyCompleted => "partially_completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Completed or partially completed
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::PartiallyCompleted)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one job execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub execution_id: Uuid,
    pub job: String,
    pub status: JobStatus,
    /// Records pulled from the source, including skipped ones
    pub read: u64,
    /// Records that produced an entity
    pub processed: u64,
    /// Entities stored by committed chunks
    pub written: u64,
    pub skipped: u64,
    /// Extra validator attempts
    pub retried: u64,
    pub chunks: u64,
    pub committed_chunks: u64,
    pub rolled_back_chunks: u64,
    /// Entities whose individual write failed inside a committed chunk
    pub write_errors: u64,
    pub anomalies: u64,
    pub skip_reasons: BTreeMap<String, u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub failure: Option<String>,
}

impl ExecutionReport {
    /// Written over read, 0 when nothing was read
    pub fn success_rate(&self) -> f64 {
        if self.read == 0 {
            0.0
        } else {
            self.written as f64 / self.read as f64
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as f64 / 1000.0,
            _ => 0.0,
        }
    }

    /// Written entities per second of wall time
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed_secs();
        if elapsed > 0.0 {
            self.written as f64 / elapsed
        } else {
            self.written as f64
        }
    }
}

/// Shared, thread-safe accumulator behind an [`ExecutionReport`]
#[derive(Debug)]
pub struct ExecutionReporter {
    execution_id: Uuid,
    job: String,
    read: AtomicU64,
    processed: AtomicU64,
    written: AtomicU64,
    skipped: AtomicU64,
    retried: AtomicU64,
    chunks: AtomicU64,
    committed_chunks: AtomicU64,
    rolled_back_chunks: AtomicU64,
    write_errors: AtomicU64,
    anomalies: AtomicU64,
    skip_reasons: Mutex<BTreeMap<String, u64>>,
    started_at: OnceLock<DateTime<Utc>>,
}

impl ExecutionReporter {
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            job: job.into(),
            read: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            written: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            chunks: AtomicU64::new(0),
            committed_chunks: AtomicU64::new(0),
            rolled_back_chunks: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
            skip_reasons: Mutex::new(BTreeMap::new()),
            started_at: OnceLock::new(),
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn start(&self) {
        let _ = self.started_at.set(Utc::now());
    }

    pub fn record_read(&self) {
        self.read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retries(&self, retries: u32) {
        self.retried.fetch_add(u64::from(retries), Ordering::Relaxed);
    }

    pub fn record_anomalies(&self, count: usize) {
        self.anomalies.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_skip(&self, reason: &str) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        let mut reasons = self.skip_reasons.lock().unwrap_or_else(PoisonError::into_inner);
        *reasons.entry(reason.to_string()).or_insert(0) += 1;
    }

    /// A chunk was formed; returns its 1-based sequence number
    pub fn record_chunk(&self) -> u64 {
        self.chunks.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_commit(&self, written: u64, write_errors: u64) {
        self.committed_chunks.fetch_add(1, Ordering::Relaxed);
        self.written.fetch_add(written, Ordering::Relaxed);
        self.write_errors.fetch_add(write_errors, Ordering::Relaxed);
    }

    pub fn record_rollback(&self) {
        self.rolled_back_chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Snapshot while the job is still running
    pub fn snapshot(&self) -> ExecutionReport {
        self.build(JobStatus::Running, None, None)
    }

    /// Final report; `failure` carries the error that aborted the job.
    pub fn finish(&self, failure: Option<String>) -> ExecutionReport {
        let status = if failure.is_some() {
            JobStatus::Failed
        } else if self.skipped() > 0 || self.write_errors.load(Ordering::Relaxed) > 0 {
            JobStatus::PartiallyCompleted
        } else {
            JobStatus::Completed
        };
        self.build(status, Some(Utc::now()), failure)
    }

    fn build(&self, status: JobStatus, ended_at: Option<DateTime<Utc>>, failure: Option<String>) -> ExecutionReport {
        let started_at = self.started_at.get().copied();
        ExecutionReport {
            execution_id: self.execution_id,
            job: self.job.clone(),
            status: if started_at.is_none() && status == JobStatus::Running {
                JobStatus::NotStarted
            } else {
                status
            },
            read: self.read.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            skipped: self.skipped(),
            retried: self.retried.load(Ordering::Relaxed),
            chunks: self.chunks.load(Ordering::Relaxed),
            committed_chunks: self.committed_chunks.load(Ordering::Relaxed),
            rolled_back_chunks: self.rolled_back_chunks.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
            skip_reasons: self
                .skip_reasons
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            started_at,
            ended_at,
            failure,
        }
    }
}
