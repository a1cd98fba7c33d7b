//! Chunk-oriented job execution
//!
//! The orchestrator reads the source in file order, maps and validates each
//! record, lets the skip policy rule on every failure and cuts the survivors
//! into chunks. Chunks go to the worker pool, where a [`ChunkCommitter`]
//! writes them. A fatal error anywhere cancels dispatch; chunks already
//! handed to the pool still drain before the job ends.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::chunk::{Chunk, ChunkBuilder};
use crate::config::JobSettings;
use crate::domain::{Domain, ProcessContext, ProcessOutcome};
use crate::error::{PipelineError, RecordError};
use crate::mapper::FieldMapper;
use crate::observer::{PipelineEvent, PipelineObserver};
use crate::policy::{SkipBudget, SkipPolicy};
use crate::pool::{PoolSettings, TaskHandler, WorkerPool};
use crate::report::{ExecutionReport, ExecutionReporter};
use crate::retry::{Attempted, RetryController};
use crate::source::{RawRecord, RecordSource};
use crate::store::EntityStore;
use crate::writer::UpsertWriter;

pub struct ChunkOrchestrator<D: Domain> {
    domain: D,
    mapper: FieldMapper<D::Row>,
    settings: JobSettings,
    store: Arc<dyn EntityStore>,
    observer: Arc<dyn PipelineObserver>,
}

impl<D: Domain> ChunkOrchestrator<D> {
    pub fn new(
        domain: D,
        settings: JobSettings,
        store: Arc<dyn EntityStore>,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        Self {
            domain,
            mapper: FieldMapper::new(),
            settings,
            store,
            observer,
        }
    }

    /// Run the job named `job` over the file at `path`.
    ///
    /// Never fails: a job-level error ends the report as failed with the
    /// counts reached so far.
    pub async fn run(&self, job: &str, path: &Path, ctx: &ProcessContext) -> ExecutionReport {
        let reporter = Arc::new(ExecutionReporter::new(job));
        reporter.start();
        self.observer.on_event(&PipelineEvent::JobStarted {
            job,
            execution_id: reporter.execution_id(),
        });
        info!(
            job,
            domain = self.domain.name(),
            path = %path.display(),
            chunk_size = self.settings.chunk_size,
            skip_limit = self.settings.skip_limit,
            "reading input"
        );

        let failure = self.execute(job, path, ctx, &reporter).await.err();
        if let Some(err) = &failure {
            error!(job, error = %err, "job aborted");
        }

        let report = reporter.finish(failure.map(|e| e.to_string()));
        self.observer.on_event(&PipelineEvent::JobFinished { report: &report });
        report
    }

    async fn execute(
        &self,
        job: &str,
        path: &Path,
        ctx: &ProcessContext,
        reporter: &Arc<ExecutionReporter>,
    ) -> Result<(), PipelineError> {
        let mut source = RecordSource::open(path, self.settings.delimiter).await?;
        debug!(
            job,
            path = %source.path().display(),
            columns = %self.mapper.columns().join(","),
            "input opened"
        );

        let cancel = CancellationToken::new();
        let committer = Arc::new(ChunkCommitter {
            writer: UpsertWriter::new(
                Arc::clone(&self.store),
                Arc::clone(&self.observer),
                job,
                self.settings.commit_retries,
            ),
            reporter: Arc::clone(reporter),
            cancel: cancel.clone(),
            failure: Mutex::new(None),
        });
        let mut pool: WorkerPool<Chunk> = WorkerPool::start(
            PoolSettings {
                core_workers: self.settings.core_workers,
                max_workers: self.settings.max_workers,
                queue_capacity: self.settings.queue_capacity,
            },
            committer.clone(),
        );

        let dispatched = self
            .dispatch(job, &mut source, ctx, reporter, &mut pool, &cancel)
            .await;
        if dispatched.is_err() {
            cancel.cancel();
        }

        let drained = pool.shutdown(self.settings.shutdown_grace).await;

        dispatched?;
        if let Some(err) = committer.take_failure() {
            return Err(err);
        }
        drained
    }

    async fn dispatch(
        &self,
        job: &str,
        source: &mut RecordSource,
        ctx: &ProcessContext,
        reporter: &ExecutionReporter,
        pool: &mut WorkerPool<Chunk>,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let retry = RetryController::new(self.settings.retry_limit);
        let policy = SkipPolicy::new(self.settings.skip_limit);
        let budget = SkipBudget::new(self.settings.skip_limit);
        let mut chunks = ChunkBuilder::new(self.settings.chunk_size);

        loop {
            if cancel.is_cancelled() {
                info!(job, "dispatch stopped after a chunk failed to commit");
                return Ok(());
            }
            let Some(read) = source.next().await? else {
                break;
            };
            reporter.record_read();

            let (line, attempted) = match read {
                Ok(record) => (record.line, self.attempt(&record, ctx, &retry)),
                Err(err) => (line_of(&err), Attempted {
                    outcome: ProcessOutcome::Fail(err),
                    retries: 0,
                }),
            };

            if attempted.retries > 0 {
                reporter.record_retries(attempted.retries);
                self.observer.on_event(&PipelineEvent::RecordRetried {
                    job,
                    line,
                    retries: attempted.retries,
                });
            }

            let entity = match attempted.outcome {
                ProcessOutcome::Emit(entity) => {
                    reporter.record_processed();
                    let anomalies = entity.anomalies();
                    if !anomalies.is_empty() {
                        reporter.record_anomalies(anomalies.len());
                        let key = entity.natural_key();
                        for anomaly in anomalies {
                            self.observer.on_event(&PipelineEvent::AnomalyDetected {
                                job,
                                key: &key,
                                anomaly: *anomaly,
                            });
                        }
                    }
                    Some(entity)
                },
                ProcessOutcome::Skip(signal) => {
                    reporter.record_skip(signal.reason);
                    self.observer.on_event(&PipelineEvent::RecordSkipped {
                        job,
                        line,
                        reason: signal.reason,
                        message: "record dropped without error",
                    });
                    None
                },
                ProcessOutcome::Fail(err) => {
                    self.skip_or_abort(job, line, err, &policy, &budget, reporter)?;
                    None
                },
            };

            if let Some(chunk) = chunks.push(entity) {
                self.submit(job, chunk, reporter, pool).await;
            }
        }

        if let Some(chunk) = chunks.finish() {
            self.submit(job, chunk, reporter, pool).await;
        }
        Ok(())
    }

    fn attempt(&self, record: &RawRecord, ctx: &ProcessContext, retry: &RetryController) -> Attempted {
        match self.mapper.map(record) {
            Ok(row) => retry.run(|_| self.domain.process(&row, ctx)),
            Err(err) => Attempted {
                outcome: ProcessOutcome::Fail(err),
                retries: 0,
            },
        }
    }

    fn skip_or_abort(
        &self,
        job: &str,
        line: u64,
        err: RecordError,
        policy: &SkipPolicy,
        budget: &SkipBudget,
        reporter: &ExecutionReporter,
    ) -> Result<(), PipelineError> {
        let exceeded = |limit: u64, cause: RecordError| PipelineError::SkipBudgetExceeded { limit, line, cause };

        match policy.should_skip(&err, budget.used()) {
            Ok(true) => {
                if let Err(spent) = budget.charge() {
                    return Err(exceeded(spent.limit, err));
                }
                let reason = policy.reason(&err);
                reporter.record_skip(reason);
                self.observer.on_event(&PipelineEvent::RecordSkipped {
                    job,
                    line,
                    reason,
                    message: &err.to_string(),
                });
                Ok(())
            },
            Ok(false) => Err(PipelineError::from_fatal_record(line, err)),
            Err(spent) => Err(exceeded(spent.limit, err)),
        }
    }

    async fn submit(&self, job: &str, chunk: Chunk, reporter: &ExecutionReporter, pool: &mut WorkerPool<Chunk>) {
        reporter.record_chunk();
        if chunk.is_empty() {
            debug!(job, chunk = chunk.sequence, consumed = chunk.consumed, "chunk has no entities to write");
            return;
        }
        let dispatch = pool.submit(chunk).await;
        debug!(job, ?dispatch, "chunk dispatched");
    }
}

fn line_of(err: &RecordError) -> u64 {
    match err {
        RecordError::MalformedRecord { line, .. } | RecordError::SchemaMismatch { line, .. } => *line,
        _ => 0,
    }
}

/// Pool task handler: writes a chunk and folds the result into the report
struct ChunkCommitter {
    writer: UpsertWriter,
    reporter: Arc<ExecutionReporter>,
    cancel: CancellationToken,
    failure: Mutex<Option<PipelineError>>,
}

impl ChunkCommitter {
    fn take_failure(&self) -> Option<PipelineError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Keep the first failure and stop further dispatch
    fn fail(&self, err: PipelineError) {
        let mut slot = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        }
        self.cancel.cancel();
    }
}

#[async_trait]
impl TaskHandler<Chunk> for ChunkCommitter {
    async fn handle(&self, chunk: Chunk) {
        match self.writer.write(&chunk).await {
            Ok(result) => {
                for _ in 1..result.attempts {
                    self.reporter.record_rollback();
                }
                self.reporter.record_commit(result.written(), result.failed);
            },
            Err(err) => {
                if let PipelineError::ChunkCommitFailure { attempts, .. } = &err {
                    for _ in 0..*attempts {
                        self.reporter.record_rollback();
                    }
                }
                error!(job = self.reporter.job(), chunk = chunk.sequence, error = %err, "chunk abandoned");
                self.fail(err);
            },
        }
    }
}
