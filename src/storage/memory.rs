//! In-memory reference implementation of the storage contract.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::hash::xxhash_32;

use super::StorageBackend;

/// Volatile storage backend backed by hash maps.
///
/// The reference implementation of [`StorageBackend`], useful for tests and
/// for corpora that fit in memory. All three keyspaces sit behind their own
/// lock, so short operations don't contend with each other.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    settings: RwLock<HashMap<String, String>>,
    documents: RwLock<HashMap<u64, Vec<u8>>>,
    buckets: RwLock<HashMap<(u32, u32), HashSet<u64>>>,
}

impl InMemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for InMemoryStore {
    async fn put_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.settings
            .write()
            .map_err(|_| StoreError::backend("poisoned settings lock"))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let guard = self
            .settings
            .read()
            .map_err(|_| StoreError::backend("poisoned settings lock"))?;
        Ok(guard.get(key).cloned())
    }

    async fn put_document(&self, blob: Vec<u8>, id: Option<u64>) -> Result<u64, StoreError> {
        let mut guard = self
            .documents
            .write()
            .map_err(|_| StoreError::backend("poisoned document lock"))?;
        let id = match id {
            Some(id) => id,
            None => {
                // Derive a stable 32-bit candidate from the blob and probe
                // linearly until an unused slot turns up.
                let mut candidate = u64::from(xxhash_32(&blob));
                while guard.contains_key(&candidate) {
                    candidate += 1;
                }
                candidate
            }
        };
        guard.insert(id, blob);
        Ok(id)
    }

    async fn get_document(&self, id: u64) -> Result<Vec<u8>, StoreError> {
        let guard = self
            .documents
            .read()
            .map_err(|_| StoreError::backend("poisoned document lock"))?;
        guard.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn delete_document(&self, id: u64) -> Result<(), StoreError> {
        self.documents
            .write()
            .map_err(|_| StoreError::backend("poisoned document lock"))?
            .remove(&id);
        Ok(())
    }

    async fn add_to_bucket(&self, band: u32, band_hash: u32, id: u64) -> Result<(), StoreError> {
        self.buckets
            .write()
            .map_err(|_| StoreError::backend("poisoned bucket lock"))?
            .entry((band, band_hash))
            .or_default()
            .insert(id);
        Ok(())
    }

    async fn get_bucket(&self, band: u32, band_hash: u32) -> Result<Vec<u64>, StoreError> {
        let guard = self
            .buckets
            .read()
            .map_err(|_| StoreError::backend("poisoned bucket lock"))?;
        Ok(guard
            .get(&(band, band_hash))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn remove_from_bucket(
        &self,
        band: u32,
        band_hash: u32,
        id: u64,
    ) -> Result<(), StoreError> {
        let mut guard = self
            .buckets
            .write()
            .map_err(|_| StoreError::backend("poisoned bucket lock"))?;
        if let Some(ids) = guard.get_mut(&(band, band_hash)) {
            ids.remove(&id);
            if ids.is_empty() {
                guard.remove(&(band, band_hash));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn settings_overwrite() {
        let store = InMemoryStore::new();
        store.put_setting("k", "155").await.unwrap();
        assert_eq!(store.get_setting("k").await.unwrap().as_deref(), Some("155"));
        store.put_setting("k", "268").await.unwrap();
        assert_eq!(store.get_setting("k").await.unwrap().as_deref(), Some("268"));
        assert_eq!(store.get_setting("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn document_without_id_gets_one_assigned() {
        let store = InMemoryStore::new();
        let id = store.put_document(b"abcd efgh".to_vec(), None).await.unwrap();
        assert_eq!(store.get_document(id).await.unwrap(), b"abcd efgh");
    }

    #[tokio::test]
    async fn duplicate_blob_gets_a_distinct_id() {
        let store = InMemoryStore::new();
        let first = store.put_document(b"abcd efgh".to_vec(), None).await.unwrap();
        let second = store.put_document(b"abcd efgh".to_vec(), None).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(store.get_document(second).await.unwrap(), b"abcd efgh");
    }

    #[tokio::test]
    async fn supplied_id_overwrites() {
        let store = InMemoryStore::new();
        let id = store
            .put_document(b"first".to_vec(), Some(1234))
            .await
            .unwrap();
        assert_eq!(id, 1234);
        let id = store
            .put_document(b"second".to_vec(), Some(1234))
            .await
            .unwrap();
        assert_eq!(id, 1234);
        assert_eq!(store.get_document(1234).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn missing_document_is_not_found() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.get_document(1).await,
            Err(StoreError::NotFound(1))
        ));
        store.put_document(b"x".to_vec(), Some(1)).await.unwrap();
        assert!(matches!(
            store.get_documents(&[1, 2]).await,
            Err(StoreError::NotFound(2))
        ));
    }

    #[tokio::test]
    async fn delete_document_is_quiet_for_missing_ids() {
        let store = InMemoryStore::new();
        store.put_document(b"x".to_vec(), Some(1)).await.unwrap();
        store.delete_document(1).await.unwrap();
        store.delete_document(1).await.unwrap();
        assert!(store.get_document(1).await.is_err());
    }

    #[tokio::test]
    async fn buckets_collect_and_release_ids() {
        let store = InMemoryStore::new();
        store.add_to_bucket(1, 10, 10).await.unwrap();
        store.add_to_bucket(1, 20, 20).await.unwrap();
        store.add_to_bucket(1, 20, 21).await.unwrap();
        // Adding the same member twice keeps the bucket a set.
        store.add_to_bucket(1, 20, 21).await.unwrap();

        assert_eq!(store.get_bucket(1, 10).await.unwrap(), vec![10]);
        let mut ids = store.get_bucket(1, 20).await.unwrap();
        ids.sort_unstable();
        assert_eq!(ids, vec![20, 21]);
        assert!(store.get_bucket(2, 10).await.unwrap().is_empty());

        store.remove_from_bucket(1, 20, 21).await.unwrap();
        // Removing a non-member is a no-op.
        store.remove_from_bucket(1, 20, 99).await.unwrap();
        assert_eq!(store.get_bucket(1, 20).await.unwrap(), vec![20]);
    }
}
