//! Transactional entity storage
//!
//! The writer only needs keyed lookup and upsert inside a transaction, plus
//! optional savepoints so one bad entity does not poison its chunk.

pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;

use async_trait::async_trait;

use crate::domain::{EntityKey, EntityKind, ValidatedEntity};
use crate::error::StoreError;

pub use memory::MemoryStore;
#[cfg(feature = "database")]
pub use postgres::PgEntityStore;

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Open a transaction covering one chunk
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    /// Committed row for `key`, outside any transaction
    async fn get(&self, key: &EntityKey) -> Result<Option<ValidatedEntity>, StoreError>;

    /// Committed rows of `kind`
    async fn count(&self, kind: EntityKind) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait StoreTransaction: Send {
    async fn find_by_key(&mut self, key: &EntityKey) -> Result<Option<ValidatedEntity>, StoreError>;

    /// Insert `entity`, or replace the row with the same natural key
    async fn upsert(&mut self, entity: &ValidatedEntity) -> Result<(), StoreError>;

    async fn savepoint(&mut self, _name: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn release_savepoint(&mut self, _name: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, _name: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discard every pending write. Dropping an uncommitted transaction has
    /// the same effect, minus the error report.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
