use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;

/// User metadata attached to a stored object version.
pub type ObjectMetadata = BTreeMap<String, String>;

/// Handle returned by a successful put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionHandle {
    pub version_id: String,
    /// Content fingerprint (ETag on S3).
    pub fingerprint: String,
}

/// One entry of a version listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub key: String,
    pub version_id: String,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub is_latest: bool,
}

/// A fetched object version.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: String,
    pub version_id: String,
    pub body: Vec<u8>,
    pub metadata: ObjectMetadata,
    pub last_modified: DateTime<Utc>,
}

/// Versioned object store contract.
///
/// Implementations must return version listings grouped by key and, within a
/// key, in strict and stable creation order (oldest first). The lock protocol
/// depends on it.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns the backend identifier (e.g. "s3", "memory").
    fn backend_name(&self) -> &'static str;

    /// Write a new version of `key`.
    async fn put(
        &self,
        key: &str,
        body: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<VersionHandle, StoreError>;

    /// Fetch the latest version of `key`, or the given version.
    ///
    /// Returns `None` if the key or version does not exist.
    async fn get(
        &self,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<Option<StoredObject>, StoreError>;

    /// List every version of every key starting with `prefix`.
    async fn list_versions(&self, prefix: &str) -> Result<Vec<VersionInfo>, StoreError>;

    /// Permanently delete one version. Deleting a missing version succeeds.
    async fn delete(&self, key: &str, version_id: &str) -> Result<(), StoreError>;
}

/// Versions of exactly `key`, oldest first.
pub async fn versions_of(
    store: &dyn ObjectStore,
    key: &str,
) -> Result<Vec<VersionInfo>, StoreError> {
    let mut versions = store.list_versions(key).await?;
    versions.retain(|v| v.key == key);
    Ok(versions)
}
