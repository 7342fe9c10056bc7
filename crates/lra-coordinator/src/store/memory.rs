//! In-memory implementation of the LRA store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{LraStore, StoreError};
use crate::types::{LraId, LraRecord};

/// In-memory store, suitable for tests and single-instance deployments that
/// can tolerate losing in-flight LRAs on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<LraId, LraRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl LraStore for MemoryStore {
    async fn insert(&self, record: LraRecord) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap();
        if data.contains_key(&record.id) {
            return Err(StoreError::Duplicate);
        }
        data.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &LraId) -> Result<Option<LraRecord>, StoreError> {
        Ok(self.data.lock().unwrap().get(id).cloned())
    }

    async fn update(&self, record: LraRecord) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap();
        if !data.contains_key(&record.id) {
            return Err(StoreError::NotFound);
        }
        data.insert(record.id.clone(), record);
        Ok(())
    }

    async fn list_non_terminal(&self) -> Result<Vec<LraId>, StoreError> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .values()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.id.clone())
            .collect())
    }

    async fn list_terminal_ended_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<LraId>, StoreError> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.status.is_terminal())
            .filter(|r| r.ended_at.is_some_and(|ended| ended < cutoff))
            .map(|r| r.id.clone())
            .collect())
    }

    async fn remove(&self, id: &LraId) -> Result<(), StoreError> {
        self.data.lock().unwrap().remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LraStatus;

    fn record(uri: &str) -> LraRecord {
        LraRecord::new(LraId::from_uri(uri), None)
    }

    #[tokio::test]
    async fn test_insert_get_update_remove() {
        let store = MemoryStore::new();
        let id = LraId::from_uri("http://c/lra/1");

        assert!(store.get(&id).await.unwrap().is_none());

        store.insert(record("http://c/lra/1")).await.unwrap();
        let mut fetched = store.get(&id).await.unwrap().unwrap();
        assert_eq!(fetched.status, LraStatus::Active);

        fetched.status = LraStatus::Closing;
        store.update(fetched).await.unwrap();
        assert_eq!(
            store.get(&id).await.unwrap().unwrap().status,
            LraStatus::Closing
        );

        store.remove(&id).await.unwrap();
        assert!(store.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = MemoryStore::new();
        store.insert(record("http://c/lra/1")).await.unwrap();
        assert!(matches!(
            store.insert(record("http://c/lra/1")).await,
            Err(StoreError::Duplicate)
        ));
    }

    #[tokio::test]
    async fn test_update_unknown_id_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.update(record("http://c/lra/ghost")).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_list_non_terminal_skips_finished() {
        let store = MemoryStore::new();
        store.insert(record("http://c/lra/open")).await.unwrap();

        let mut done = record("http://c/lra/done");
        done.status = LraStatus::Closed;
        done.ended_at = Some(Utc::now());
        store.insert(done).await.unwrap();

        let open = store.list_non_terminal().await.unwrap();
        assert_eq!(open, vec![LraId::from_uri("http://c/lra/open")]);
    }

    #[tokio::test]
    async fn test_list_terminal_respects_cutoff() {
        let store = MemoryStore::new();
        let mut old = record("http://c/lra/old");
        old.status = LraStatus::Cancelled;
        old.ended_at = Some(Utc::now() - chrono::Duration::minutes(30));
        store.insert(old).await.unwrap();

        let mut fresh = record("http://c/lra/fresh");
        fresh.status = LraStatus::Closed;
        fresh.ended_at = Some(Utc::now());
        store.insert(fresh).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::minutes(10);
        let expired = store.list_terminal_ended_before(cutoff).await.unwrap();
        assert_eq!(expired, vec![LraId::from_uri("http://c/lra/old")]);
    }
}
