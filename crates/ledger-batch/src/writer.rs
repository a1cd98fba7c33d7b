//! Chunk persistence
//!
//! One transaction per chunk. Each entity is written under its own savepoint
//! so a failed lookup or upsert only loses that entity; the chunk as a whole
//! is all-or-nothing at commit.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::chunk::Chunk;
use crate::domain::ValidatedEntity;
use crate::error::{PipelineError, StoreError};
use crate::observer::{PipelineEvent, PipelineObserver};
use crate::store::{EntityStore, StoreTransaction};

/// Counts for one committed chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitResult {
    pub inserted: u64,
    pub updated: u64,
    /// Entities whose write failed and were left out of the commit
    pub failed: u64,
    /// Transactions opened, the successful one included
    pub attempts: u32,
}

impl CommitResult {
    pub fn written(&self) -> u64 {
        self.inserted + self.updated
    }
}

enum Written {
    Inserted,
    Updated,
}

pub struct UpsertWriter {
    store: Arc<dyn EntityStore>,
    observer: Arc<dyn PipelineObserver>,
    job: String,
    commit_retries: u32,
}

impl UpsertWriter {
    pub fn new(
        store: Arc<dyn EntityStore>,
        observer: Arc<dyn PipelineObserver>,
        job: impl Into<String>,
        commit_retries: u32,
    ) -> Self {
        Self {
            store,
            observer,
            job: job.into(),
            commit_retries,
        }
    }

    /// Persist `chunk`, retrying with a fresh transaction when it cannot
    /// commit. Fails with [`PipelineError::ChunkCommitFailure`] once the
    /// retries are spent.
    pub async fn write(&self, chunk: &Chunk) -> Result<CommitResult, PipelineError> {
        let max_attempts = self.commit_retries.saturating_add(1);
        let mut attempt = 1;

        loop {
            match self.write_once(chunk).await {
                Ok(mut result) => {
                    result.attempts = attempt;
                    self.observer.on_event(&PipelineEvent::ChunkCommitted {
                        job: &self.job,
                        chunk: chunk.sequence,
                        written: result.written(),
                        failed: result.failed,
                    });
                    return Ok(result);
                },
                Err(source) => {
                    let message = source.to_string();
                    self.observer.on_event(&PipelineEvent::ChunkRolledBack {
                        job: &self.job,
                        chunk: chunk.sequence,
                        attempt,
                        error: &message,
                    });
                    if attempt >= max_attempts {
                        return Err(PipelineError::ChunkCommitFailure {
                            chunk: chunk.sequence,
                            attempts: attempt,
                            source,
                        });
                    }
                    attempt += 1;
                },
            }
        }
    }

    async fn write_once(&self, chunk: &Chunk) -> Result<CommitResult, StoreError> {
        let mut tx = self.store.begin().await?;

        let result = match self.write_entities(tx.as_mut(), chunk).await {
            Ok(result) => result,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(
                        job = %self.job,
                        chunk = chunk.sequence,
                        error = %rollback,
                        "chunk rollback failed"
                    );
                }
                return Err(e);
            },
        };

        tx.commit().await?;
        debug!(
            job = %self.job,
            chunk = chunk.sequence,
            inserted = result.inserted,
            updated = result.updated,
            failed = result.failed,
            "chunk transaction committed"
        );
        Ok(result)
    }

    async fn write_entities(&self, tx: &mut dyn StoreTransaction, chunk: &Chunk) -> Result<CommitResult, StoreError> {
        let mut result = CommitResult::default();

        for (position, entity) in chunk.entities.iter().enumerate() {
            let savepoint = format!("entity_{position}");
            tx.savepoint(&savepoint).await?;

            match upsert_one(&mut *tx, entity).await {
                Ok(Written::Inserted) => {
                    tx.release_savepoint(&savepoint).await?;
                    result.inserted += 1;
                },
                Ok(Written::Updated) => {
                    tx.release_savepoint(&savepoint).await?;
                    result.updated += 1;
                },
                Err(e) => {
                    warn!(
                        job = %self.job,
                        chunk = chunk.sequence,
                        key = %entity.natural_key(),
                        error = %e,
                        "entity write failed, continuing with the rest of the chunk"
                    );
                    tx.rollback_to_savepoint(&savepoint).await?;
                    tx.release_savepoint(&savepoint).await?;
                    result.failed += 1;
                },
            }
        }

        Ok(result)
    }
}

async fn upsert_one(tx: &mut dyn StoreTransaction, entity: &ValidatedEntity) -> Result<Written, StoreError> {
    match tx.find_by_key(&entity.natural_key()).await? {
        Some(existing) => {
            tx.upsert(&existing.merged_with(entity)).await?;
            Ok(Written::Updated)
        },
        None => {
            tx.upsert(entity).await?;
            Ok(Written::Inserted)
        },
    }
}
