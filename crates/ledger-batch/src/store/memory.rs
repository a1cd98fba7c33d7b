//! In-process store
//!
//! Rows live in a map behind an async lock. A transaction buffers its writes
//! and applies them in one step on commit, so a rolled-back chunk leaves no
//! trace. Failures can be scripted to exercise rollback paths.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{EntityStore, StoreTransaction};
use crate::domain::{EntityKey, EntityKind, ValidatedEntity};
use crate::error::StoreError;

type Rows = BTreeMap<EntityKey, ValidatedEntity>;

#[derive(Debug, Default)]
struct Inner {
    rows: RwLock<Rows>,
    failing_commits: AtomicU32,
    failing_savepoints: AtomicU32,
    rejected_keys: Mutex<HashSet<EntityKey>>,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

impl Inner {
    fn is_rejected(&self, key: &EntityKey) -> bool {
        self.rejected_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail
    pub fn fail_next_commits(&self, count: u32) {
        self.inner.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` savepoints fail
    pub fn fail_next_savepoints(&self, count: u32) {
        self.inner.failing_savepoints.store(count, Ordering::SeqCst);
    }

    /// Make every write of `key` fail
    pub fn reject_key(&self, key: EntityKey) {
        self.inner
            .rejected_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
    }

    /// Successful commits so far
    pub fn commit_count(&self) -> u64 {
        self.inner.commits.load(Ordering::SeqCst)
    }

    /// Transactions explicitly rolled back so far
    pub fn rollback_count(&self) -> u64 {
        self.inner.rollbacks.load(Ordering::SeqCst)
    }

    /// Committed rows in key order
    pub async fn rows(&self) -> Vec<ValidatedEntity> {
        self.inner.rows.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            pending: Rows::new(),
            savepoints: Vec::new(),
        }))
    }

    async fn get(&self, key: &EntityKey) -> Result<Option<ValidatedEntity>, StoreError> {
        Ok(self.inner.rows.read().await.get(key).cloned())
    }

    async fn count(&self, kind: EntityKind) -> Result<u64, StoreError> {
        let rows = self.inner.rows.read().await;
        Ok(rows.keys().filter(|k| k.kind() == kind).count() as u64)
    }
}

struct MemoryTransaction {
    inner: Arc<Inner>,
    pending: Rows,
    savepoints: Vec<(String, Rows)>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn find_by_key(&mut self, key: &EntityKey) -> Result<Option<ValidatedEntity>, StoreError> {
        if let Some(row) = self.pending.get(key) {
            return Ok(Some(row.clone()));
        }
        Ok(self.inner.rows.read().await.get(key).cloned())
    }

    async fn upsert(&mut self, entity: &ValidatedEntity) -> Result<(), StoreError> {
        let key = entity.natural_key();
        if self.inner.is_rejected(&key) {
            return Err(StoreError::Write {
                key: key.to_string(),
                message: "rejected by store".to_string(),
            });
        }
        self.pending.insert(key, entity.clone());
        Ok(())
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        if take_scripted(&self.inner.failing_savepoints) {
            return Err(StoreError::Transaction(format!("scripted failure creating savepoint {name}")));
        }
        self.savepoints.push((name.to_string(), self.pending.clone()));
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        let position = self.position(name)?;
        self.savepoints.truncate(position);
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        let position = self.position(name)?;
        self.savepoints.truncate(position + 1);
        if let Some((_, snapshot)) = self.savepoints.last() {
            self.pending = snapshot.clone();
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction { inner, pending, .. } = *self;

        if take_scripted(&inner.failing_commits) {
            return Err(StoreError::Commit("scripted commit failure".to_string()));
        }

        inner.rows.write().await.extend(pending);
        inner.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Consume one scripted failure, if any are left
fn take_scripted(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl MemoryTransaction {
    fn position(&self, name: &str) -> Result<usize, StoreError> {
        self.savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| StoreError::Transaction(format!("no savepoint named {name}")))
    }
}
