//! Durable record of LRA state.
//!
//! The store is the single source of truth and is passed explicitly to every
//! component. Updates replace the whole per-LRA record, so an LRA's state and
//! its participant statuses are always durable together. The engine
//! serializes writers per LRA id; the store itself only guarantees that each
//! operation is atomic.

mod journal;
mod memory;

pub use journal::JournalStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{LraId, LraRecord};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("lra not found")]
    NotFound,
    #[error("lra already exists")]
    Duplicate,
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("storage error: {0}")]
    Io(String),
}

#[async_trait]
pub trait LraStore: Send + Sync {
    /// Insert a fresh record. Fails with `Duplicate` on id collision.
    async fn insert(&self, record: LraRecord) -> Result<(), StoreError>;

    /// Fetch a record by id.
    async fn get(&self, id: &LraId) -> Result<Option<LraRecord>, StoreError>;

    /// Replace a record wholesale. Fails with `NotFound` for unknown ids.
    async fn update(&self, record: LraRecord) -> Result<(), StoreError>;

    /// Ids of every LRA not yet in a terminal state, for recovery scanning.
    async fn list_non_terminal(&self) -> Result<Vec<LraId>, StoreError>;

    /// Ids of terminal LRAs that ended before `cutoff`, for garbage
    /// collection.
    async fn list_terminal_ended_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<LraId>, StoreError>;

    /// Remove a record. Removing an unknown id is a no-op.
    async fn remove(&self, id: &LraId) -> Result<(), StoreError>;
}
