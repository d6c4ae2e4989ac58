//! Distributed mutual exclusion over a versioned object store.
//!
//! A lock for root object `id` is the object at `{id}#`. Every acquisition
//! attempt writes a new version, then lists the key: the earliest-created
//! version is the holder. Losers remove their own version again.

mod manager;
mod session;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;
use vstore_core::{versions_of, ObjectStore, StoreError};

pub use manager::LockSessionManager;
pub use session::{LockAcquireResult, LockSession, LockSessionFactory};

/// Body of a lock marker version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub expiration_date: DateTime<Utc>,
    /// Random per attempt, so every attempt has a distinct fingerprint.
    pub unique_key: Uuid,
}

impl LockRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date <= now
    }
}

/// Result of deleting every version of a key.
#[derive(Debug, Default)]
pub(crate) struct PurgeOutcome {
    pub deleted: usize,
    pub failures: Vec<StoreError>,
}

/// Delete every version of `key`, continuing past individual failures.
pub(crate) async fn purge_versions(
    store: &dyn ObjectStore,
    key: &str,
) -> Result<PurgeOutcome, StoreError> {
    let mut outcome = PurgeOutcome::default();
    for version in versions_of(store, key).await? {
        match store.delete(key, &version.version_id).await {
            Ok(()) => outcome.deleted += 1,
            Err(e) => {
                warn!(key, version_id = %version.version_id, error = %e, "Failed to delete lock version");
                outcome.failures.push(e);
            }
        }
    }
    Ok(outcome)
}
