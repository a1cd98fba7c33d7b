//! Pipeline events
//!
//! The orchestrator and writer describe what happens through
//! [`PipelineEvent`]s delivered to an injected [`PipelineObserver`].
//! [`TracingObserver`] turns them into structured log events.

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{Anomaly, EntityKey};
use crate::report::ExecutionReport;

#[derive(Debug, Clone, Copy)]
pub enum PipelineEvent<'a> {
    JobStarted {
        job: &'a str,
        execution_id: Uuid,
    },
    ChunkCommitted {
        job: &'a str,
        chunk: u64,
        written: u64,
        failed: u64,
    },
    ChunkRolledBack {
        job: &'a str,
        chunk: u64,
        attempt: u32,
        error: &'a str,
    },
    RecordSkipped {
        job: &'a str,
        line: u64,
        reason: &'a str,
        message: &'a str,
    },
    RecordRetried {
        job: &'a str,
        line: u64,
        retries: u32,
    },
    AnomalyDetected {
        job: &'a str,
        key: &'a EntityKey,
        anomaly: Anomaly,
    },
    JobFinished {
        report: &'a ExecutionReport,
    },
}

pub trait PipelineObserver: Send + Sync {
    fn on_event(&self, event: &PipelineEvent<'_>);
}

/// Logs every event through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn on_event(&self, event: &PipelineEvent<'_>) {
        match *event {
            PipelineEvent::JobStarted { job, execution_id } => {
                info!(job, %execution_id, "job started");
            },
            PipelineEvent::ChunkCommitted {
                job,
                chunk,
                written,
                failed,
            } => {
                debug!(job, chunk, written, failed, "chunk committed");
            },
            PipelineEvent::ChunkRolledBack {
                job,
                chunk,
                attempt,
                error,
            } => {
                warn!(job, chunk, attempt, error, "chunk rolled back");
            },
            PipelineEvent::RecordSkipped {
                job,
                line,
                reason,
                message,
            } => {
                warn!(job, line, reason, message, "record skipped");
            },
            PipelineEvent::RecordRetried { job, line, retries } => {
                debug!(job, line, retries, "record retried");
            },
            PipelineEvent::AnomalyDetected { job, key, anomaly } => {
                warn!(job, key = %key, anomaly = %anomaly, "anomaly detected");
            },
            PipelineEvent::JobFinished { report } => {
                if report.failure.is_some() {
                    error!(
                        job = %report.job,
                        status = %report.status,
                        read = report.read,
                        written = report.written,
                        skipped = report.skipped,
                        failure = report.failure.as_deref().unwrap_or_default(),
                        "job failed"
                    );
                } else {
                    info!(
                        job = %report.job,
                        status = %report.status,
                        read = report.read,
                        processed = report.processed,
                        written = report.written,
                        skipped = report.skipped,
                        retried = report.retried,
                        committed_chunks = report.committed_chunks,
                        rolled_back_chunks = report.rolled_back_chunks,
                        success_rate = report.success_rate(),
                        throughput = report.throughput(),
                        "job finished"
                    );
                }
            },
        }
    }
}
