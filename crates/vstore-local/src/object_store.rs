use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use vstore_core::{
    ObjectMetadata, ObjectStore, StoreError, StoredObject, VersionHandle, VersionInfo,
};

#[derive(Debug, Clone)]
struct StoredVersion {
    version_id: String,
    fingerprint: String,
    body: Vec<u8>,
    metadata: ObjectMetadata,
    created_at: DateTime<Utc>,
}

/// Versioned in-memory object store.
///
/// Writes are serialized in arrival order and listings are in strict creation
/// order, matching what the lock protocol expects from a real backend.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<StoredVersion>>>,
    next_version: AtomicU64,
    failing_deletes: Mutex<HashSet<String>>,
    unavailable: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delete of `key` fail with `StorageUnavailable`.
    pub async fn fail_deletes_for(&self, key: &str) {
        self.failing_deletes.lock().await.insert(key.to_string());
    }

    /// Make every operation fail with `StorageUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Write a version with an explicit creation time.
    pub async fn put_at(
        &self,
        key: &str,
        body: &[u8],
        metadata: &ObjectMetadata,
        created_at: DateTime<Utc>,
    ) -> Result<VersionHandle, StoreError> {
        tokio::task::yield_now().await;
        self.check_available()?;

        let sequence = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        let version = StoredVersion {
            version_id: format!("v{:08}", sequence),
            fingerprint: fingerprint(body),
            body: body.to_vec(),
            metadata: metadata.clone(),
            created_at,
        };
        let handle = VersionHandle {
            version_id: version.version_id.clone(),
            fingerprint: version.fingerprint.clone(),
        };

        self.objects
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .push(version);

        debug!(key, version_id = %handle.version_id, "Stored version");
        Ok(handle)
    }

    /// Number of versions currently stored under `key`.
    pub async fn version_count(&self, key: &str) -> usize {
        self.objects
            .lock()
            .await
            .get(key)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Total number of versions across all keys.
    pub async fn total_versions(&self) -> usize {
        self.objects.lock().await.values().map(Vec::len).sum()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::StorageUnavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

/// Hex SHA-256 of a body, standing in for an S3 ETag.
fn fingerprint(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn put(
        &self,
        key: &str,
        body: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<VersionHandle, StoreError> {
        self.put_at(key, body, metadata, Utc::now()).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn get(
        &self,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<Option<StoredObject>, StoreError> {
        tokio::task::yield_now().await;
        self.check_available()?;

        let objects = self.objects.lock().await;
        let found = objects.get(key).and_then(|versions| match version_id {
            Some(id) => versions.iter().find(|v| v.version_id == id),
            None => versions.last(),
        });

        Ok(found.map(|v| StoredObject {
            key: key.to_string(),
            version_id: v.version_id.clone(),
            body: v.body.clone(),
            metadata: v.metadata.clone(),
            last_modified: v.created_at,
        }))
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_versions(&self, prefix: &str) -> Result<Vec<VersionInfo>, StoreError> {
        tokio::task::yield_now().await;
        self.check_available()?;

        let objects = self.objects.lock().await;
        let mut listing = Vec::new();
        for (key, versions) in objects.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            let last = versions.len().saturating_sub(1);
            for (i, v) in versions.iter().enumerate() {
                listing.push(VersionInfo {
                    key: key.clone(),
                    version_id: v.version_id.clone(),
                    fingerprint: v.fingerprint.clone(),
                    created_at: v.created_at,
                    is_latest: i == last,
                });
            }
        }
        Ok(listing)
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, key: &str, version_id: &str) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.check_available()?;

        if self.failing_deletes.lock().await.contains(key) {
            return Err(StoreError::StorageUnavailable(format!(
                "injected delete failure for {}",
                key
            )));
        }

        let mut objects = self.objects.lock().await;
        if let Some(versions) = objects.get_mut(key) {
            versions.retain(|v| v.version_id != version_id);
            if versions.is_empty() {
                objects.remove(key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listing_is_creation_ordered_per_key() {
        let store = MemoryObjectStore::new();
        let meta = ObjectMetadata::new();

        let a1 = store.put("a", b"1", &meta).await.unwrap();
        let b1 = store.put("b", b"1", &meta).await.unwrap();
        let a2 = store.put("a", b"2", &meta).await.unwrap();

        let listing = store.list_versions("").await.unwrap();
        let ids: Vec<_> = listing.iter().map(|v| v.version_id.clone()).collect();
        assert_eq!(ids, vec![a1.version_id, a2.version_id.clone(), b1.version_id]);
        assert!(!listing[0].is_latest);
        assert!(listing[1].is_latest);

        let latest = store.get("a", None).await.unwrap().unwrap();
        assert_eq!(latest.version_id, a2.version_id);
        assert_eq!(latest.body, b"2");
    }

    #[tokio::test]
    async fn test_prefix_listing_respects_separator() {
        let store = MemoryObjectStore::new();
        let meta = ObjectMetadata::new();
        store.put("4#", b"x", &meta).await.unwrap();
        store.put("42#", b"y", &meta).await.unwrap();

        let listing = store.list_versions("4#").await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].key, "4#");
    }

    #[tokio::test]
    async fn test_delete_missing_version_is_ok() {
        let store = MemoryObjectStore::new();
        let meta = ObjectMetadata::new();
        let handle = store.put("k", b"x", &meta).await.unwrap();

        store.delete("k", &handle.version_id).await.unwrap();
        store.delete("k", &handle.version_id).await.unwrap();
        store.delete("never", "v1").await.unwrap();
        assert_eq!(store.version_count("k").await, 0);
    }

    #[tokio::test]
    async fn test_identical_bodies_share_fingerprint() {
        let store = MemoryObjectStore::new();
        let meta = ObjectMetadata::new();
        let first = store.put("k", b"same", &meta).await.unwrap();
        let second = store.put("k", b"same", &meta).await.unwrap();
        assert_eq!(first.fingerprint, second.fingerprint);
        assert_ne!(first.version_id, second.version_id);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails() {
        let store = MemoryObjectStore::new();
        store.set_unavailable(true);
        let err = store.list_versions("").await.unwrap_err();
        assert!(matches!(err, StoreError::StorageUnavailable(_)));
    }
}
