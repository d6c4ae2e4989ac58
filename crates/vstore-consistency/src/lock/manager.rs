use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};
use vstore_core::keys::{lock_key, parse_lock_key};
use vstore_core::{versions_of, ObjectId, ObjectStore, StoreError, VersionInfo};

use super::{purge_versions, LockRecord};

/// Administrative view over the lock namespace.
#[derive(Clone)]
pub struct LockSessionManager {
    store: Arc<dyn ObjectStore>,
}

impl LockSessionManager {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Root object ids that currently have a lock marker.
    #[instrument(skip(self), level = "debug")]
    pub async fn list_active(&self) -> Result<Vec<ObjectId>, StoreError> {
        let versions = self.store.list_versions("").await?;

        let mut ids = Vec::new();
        let mut previous: Option<&str> = None;
        for version in &versions {
            if previous == Some(version.key.as_str()) {
                continue;
            }
            previous = Some(version.key.as_str());

            match parse_lock_key(&version.key) {
                Some(id) => ids.push(id),
                None => warn!(key = %version.key, "Skipping non-lock key in lock namespace"),
            }
        }

        debug!(count = ids.len(), "Listed active locks");
        Ok(ids)
    }

    /// Whether the lock for `root_id` has passed its expiration date.
    ///
    /// A lock with no versions left is not expired: there is nothing to reap.
    pub async fn is_expired(&self, root_id: ObjectId) -> Result<bool, StoreError> {
        self.is_expired_at(root_id, Utc::now()).await
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn is_expired_at(
        &self,
        root_id: ObjectId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(self
            .holder(root_id)
            .await?
            .is_some_and(|(_, record)| record.is_expired_at(now)))
    }

    /// Delete the holder version of `root_id` if it has expired by `now`.
    ///
    /// Only the version whose expiration was checked is removed. A lock taken
    /// again after that check has a different version and survives.
    #[instrument(skip(self), level = "debug")]
    pub async fn delete_expired_at(
        &self,
        root_id: ObjectId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let Some((holder, record)) = self.holder(root_id).await? else {
            return Ok(false);
        };
        if !record.is_expired_at(now) {
            return Ok(false);
        }

        self.store.delete(&holder.key, &holder.version_id).await?;
        debug!(root_id, version_id = %holder.version_id, "Deleted expired lock version");
        Ok(true)
    }

    /// The earliest version of the lock and its decoded body.
    async fn holder(
        &self,
        root_id: ObjectId,
    ) -> Result<Option<(VersionInfo, LockRecord)>, StoreError> {
        let key = lock_key(root_id);
        let versions = versions_of(self.store.as_ref(), &key).await?;
        let Some(holder) = versions.into_iter().next() else {
            return Ok(None);
        };

        let Some(object) = self.store.get(&key, Some(&holder.version_id)).await? else {
            return Ok(None);
        };

        let record: LockRecord = serde_json::from_slice(&object.body).map_err(|e| {
            StoreError::DataInconsistency(format!(
                "lock {} version {} has an unreadable body: {}",
                key, holder.version_id, e
            ))
        })?;

        Ok(Some((holder, record)))
    }

    /// Force-delete every version of the lock for `root_id`.
    ///
    /// Deleting a lock that no longer exists succeeds.
    #[instrument(skip(self), level = "debug")]
    pub async fn delete(&self, root_id: ObjectId) -> Result<(), StoreError> {
        let key = lock_key(root_id);
        let outcome = purge_versions(self.store.as_ref(), &key).await?;

        if let Some(first) = outcome.failures.into_iter().next() {
            return Err(StoreError::StorageUnavailable(format!(
                "failed to delete lock {}: {}",
                key, first
            )));
        }

        debug!(root_id, deleted = outcome.deleted, "Deleted lock");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use vstore_core::ObjectMetadata;
    use vstore_local::MemoryObjectStore;

    use crate::lock::LockSessionFactory;

    #[tokio::test]
    async fn test_list_active_decodes_ids() {
        let store = Arc::new(MemoryObjectStore::new());
        let factory = LockSessionFactory::new(store.clone());
        let manager = LockSessionManager::new(store.clone());

        factory.acquire(3, Duration::hours(1)).await.unwrap();
        factory.acquire(11, Duration::hours(1)).await.unwrap();
        store.put("garbage", b"{}", &ObjectMetadata::new()).await.unwrap();

        let mut ids = manager.list_active().await.unwrap();
        ids.sort_unstable();
        assert_eq!(ids, vec![3, 11]);
    }

    #[tokio::test]
    async fn test_is_expired_uses_embedded_date() {
        let store = Arc::new(MemoryObjectStore::new());
        let factory = LockSessionFactory::new(store.clone());
        let manager = LockSessionManager::new(store);

        factory.acquire(8, Duration::minutes(10)).await.unwrap();

        assert!(!manager.is_expired(8).await.unwrap());
        assert!(manager
            .is_expired_at(8, Utc::now() + Duration::minutes(11))
            .await
            .unwrap());
        assert!(!manager.is_expired(999).await.unwrap());
    }

    #[tokio::test]
    async fn test_unreadable_lock_is_inconsistent() {
        let store = Arc::new(MemoryObjectStore::new());
        store.put("5#", b"not json", &ObjectMetadata::new()).await.unwrap();
        let manager = LockSessionManager::new(store);

        let err = manager.is_expired(5).await.unwrap_err();
        assert!(matches!(err, StoreError::DataInconsistency(_)));
    }

    #[tokio::test]
    async fn test_delete_expired_spares_versions_it_did_not_check() {
        let store = Arc::new(MemoryObjectStore::new());
        let manager = LockSessionManager::new(store.clone());
        let now = Utc::now();

        for expiration_date in [now - Duration::minutes(1), now + Duration::hours(1)] {
            let record = LockRecord {
                expiration_date,
                unique_key: uuid::Uuid::new_v4(),
            };
            store
                .put("4#", &serde_json::to_vec(&record).unwrap(), &ObjectMetadata::new())
                .await
                .unwrap();
        }

        assert!(manager.delete_expired_at(4, now).await.unwrap());
        assert_eq!(store.version_count("4#").await, 1);

        // The surviving version is live, so a second pass leaves it alone.
        assert!(!manager.delete_expired_at(4, now).await.unwrap());
        assert_eq!(store.version_count("4#").await, 1);
        assert!(!manager.delete_expired_at(404, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = Arc::new(MemoryObjectStore::new());
        let factory = LockSessionFactory::new(store.clone());
        let manager = LockSessionManager::new(store.clone());

        factory.acquire(12, Duration::hours(1)).await.unwrap();
        manager.delete(12).await.unwrap();
        manager.delete(12).await.unwrap();
        assert_eq!(store.version_count("12#").await, 0);
    }

    #[tokio::test]
    async fn test_delete_surfaces_storage_faults() {
        let store = Arc::new(MemoryObjectStore::new());
        let factory = LockSessionFactory::new(store.clone());
        let manager = LockSessionManager::new(store.clone());

        factory.acquire(13, Duration::hours(1)).await.unwrap();
        store.fail_deletes_for("13#").await;

        let err = manager.delete(13).await.unwrap_err();
        assert!(matches!(err, StoreError::StorageUnavailable(_)));
    }
}
