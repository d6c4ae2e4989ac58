use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use vstore_core::keys::lock_key;
use vstore_core::{versions_of, ObjectId, ObjectMetadata, ObjectStore, StoreError};

use super::{purge_versions, LockRecord};

/// Outcome of a lock acquisition attempt.
///
/// Contention is an expected outcome, not an error: callers decide whether to
/// retry or abort.
#[derive(Debug)]
pub enum LockAcquireResult {
    Acquired(LockSession),
    AlreadyLocked,
}

impl LockAcquireResult {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockAcquireResult::Acquired(_))
    }

    pub fn into_session(self) -> Option<LockSession> {
        match self {
            LockAcquireResult::Acquired(session) => Some(session),
            LockAcquireResult::AlreadyLocked => None,
        }
    }
}

/// Creates lock sessions against the lock namespace of an object store.
#[derive(Clone)]
pub struct LockSessionFactory {
    store: Arc<dyn ObjectStore>,
}

impl LockSessionFactory {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Try to take the lock for `root_id` for `expiration` from now.
    ///
    /// 1. Any existing version means the lock is taken.
    /// 2. Write a version with a random unique key.
    /// 3. List the key again: the attempt holds the lock only if its version
    ///    is the earliest-created one. Otherwise its version is removed.
    #[instrument(skip(self), level = "debug")]
    pub async fn acquire(
        &self,
        root_id: ObjectId,
        expiration: Duration,
    ) -> Result<LockAcquireResult, StoreError> {
        let store = self.store.as_ref();
        let key = lock_key(root_id);

        if !versions_of(store, &key).await?.is_empty() {
            debug!(root_id, "Lock already present");
            return Ok(LockAcquireResult::AlreadyLocked);
        }

        let record = LockRecord {
            expiration_date: Utc::now() + expiration,
            unique_key: Uuid::new_v4(),
        };
        let body = serde_json::to_vec(&record)?;
        let handle = store.put(&key, &body, &ObjectMetadata::new()).await?;

        let versions = match versions_of(store, &key).await {
            Ok(versions) => versions,
            Err(e) => {
                self.discard_attempt(&key, &handle.version_id).await;
                return Err(e);
            }
        };

        match versions.first() {
            Some(holder) if holder.fingerprint == handle.fingerprint => {
                info!(root_id, expires_at = %record.expiration_date, "Lock acquired");
                Ok(LockAcquireResult::Acquired(LockSession {
                    store: Arc::clone(&self.store),
                    root_id,
                    key,
                    version_id: handle.version_id,
                    expiration_date: record.expiration_date,
                }))
            }
            _ => {
                debug!(root_id, versions = versions.len(), "Lost lock race");
                self.discard_attempt(&key, &handle.version_id).await;
                Ok(LockAcquireResult::AlreadyLocked)
            }
        }
    }

    async fn discard_attempt(&self, key: &str, version_id: &str) {
        if let Err(e) = self.store.delete(key, version_id).await {
            warn!(key, version_id, error = %e, "Failed to remove losing lock version");
        }
    }
}

/// A held lock. Release it when the protected operation completes.
pub struct LockSession {
    store: Arc<dyn ObjectStore>,
    root_id: ObjectId,
    key: String,
    version_id: String,
    expiration_date: DateTime<Utc>,
}

impl std::fmt::Debug for LockSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockSession")
            .field("backend", &self.store.backend_name())
            .field("key", &self.key)
            .field("version_id", &self.version_id)
            .field("expiration_date", &self.expiration_date)
            .finish()
    }
}

impl LockSession {
    pub fn root_id(&self) -> ObjectId {
        self.root_id
    }

    pub fn version_id(&self) -> &str {
        &self.version_id
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expiration_date
    }

    /// Delete every version of the lock key.
    ///
    /// Failures are logged only; leftovers expire and are reaped by the lock
    /// cleanup job.
    #[instrument(skip(self), level = "debug", fields(root_id = self.root_id))]
    pub async fn release(self) {
        match purge_versions(self.store.as_ref(), &self.key).await {
            Ok(outcome) if outcome.failures.is_empty() => {
                info!(root_id = self.root_id, deleted = outcome.deleted, "Lock released");
            }
            Ok(outcome) => {
                warn!(
                    root_id = self.root_id,
                    deleted = outcome.deleted,
                    failed = outcome.failures.len(),
                    "Lock partially released, leftovers will expire"
                );
            }
            Err(e) => {
                warn!(root_id = self.root_id, error = %e, "Failed to list lock versions on release");
            }
        }
    }
}
