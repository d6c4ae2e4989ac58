use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};
use vstore_core::{
    ObjectMetadata, ObjectStore, StoreError, StoredObject, VersionHandle, VersionInfo,
};

/// Maximum retries for transient errors (429 / 5xx).
const MAX_RETRIES: u32 = 5;
/// Base delay for exponential backoff.
const BASE_DELAY_MS: u64 = 200;

/// Object store over a versioned S3 bucket.
///
/// The bucket must have versioning enabled: every put creates a version and
/// deletes always name the version, so no delete markers are created.
/// User metadata goes through S3 headers, so keys come back lowercased.
#[derive(Clone)]
pub struct S3ObjectStore {
    s3_client: S3Client,
    bucket_name: String,
}

impl S3ObjectStore {
    pub fn new(s3_client: S3Client, bucket_name: String) -> Self {
        Self {
            s3_client,
            bucket_name,
        }
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    /// Sleep with exponential backoff + jitter.
    async fn backoff_sleep(attempt: u32) {
        let base = Duration::from_millis(BASE_DELAY_MS * 2u64.pow(attempt));
        let jitter = Duration::from_millis(rand_jitter());
        tokio::time::sleep(base + jitter).await;
    }

    /// Check if an S3 error is retryable (429, 5xx, timeouts, dispatch failures).
    fn is_retryable_s3_error<E>(err: &SdkError<E>) -> bool {
        match err {
            SdkError::ServiceError(e) => is_transient_status(e.raw().status().as_u16()),
            SdkError::ResponseError(e) => is_transient_status(e.raw().status().as_u16()),
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => true,
            _ => false,
        }
    }

    /// Run `call`, retrying transient failures with backoff.
    async fn with_retry<T, E, F, Fut>(
        operation: &'static str,
        target: &str,
        mut call: F,
    ) -> Result<T, SdkError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SdkError<E>>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Err(e) if Self::is_retryable_s3_error(&e) && attempt < MAX_RETRIES => {
                    warn!(attempt, operation, target, "S3 retryable error, retrying");
                    Self::backoff_sleep(attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..=504).contains(&status)
}

fn is_not_found<E>(err: &SdkError<E>) -> bool {
    matches!(err, SdkError::ServiceError(e) if e.raw().status().as_u16() == 404)
}

fn unavailable(operation: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::StorageUnavailable(format!("S3 {} error: {}", operation, err))
}

fn to_chrono(dt: Option<&aws_sdk_s3::primitives::DateTime>) -> DateTime<Utc> {
    dt.and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()))
        .unwrap_or_else(Utc::now)
}

/// Simple jitter using system time nanos (no external rand dependency).
fn rand_jitter() -> u64 {
    use std::time::SystemTime;
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 % 50)
        .unwrap_or(0)
}

/// Turn S3's listing order (keys ascending, newest version first) into
/// creation order within each key.
fn into_creation_order(listed: Vec<VersionInfo>) -> Vec<VersionInfo> {
    let mut groups: Vec<Vec<VersionInfo>> = Vec::new();
    for version in listed {
        match groups.last_mut() {
            Some(group) if group[0].key == version.key => group.push(version),
            _ => groups.push(vec![version]),
        }
    }
    groups
        .into_iter()
        .flat_map(|group| group.into_iter().rev())
        .collect()
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self, body, metadata), level = "debug")]
    async fn put(
        &self,
        key: &str,
        body: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<VersionHandle, StoreError> {
        let headers: HashMap<String, String> = metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let output = Self::with_retry("put_object", key, || {
            self.s3_client
                .put_object()
                .bucket(&self.bucket_name)
                .key(key)
                .body(ByteStream::from(body.to_vec()))
                .set_metadata(Some(headers.clone()))
                .send()
        })
        .await
        .map_err(|e| unavailable("put_object", e))?;

        let version_id = output.version_id().ok_or_else(|| {
            StoreError::DataInconsistency(format!(
                "bucket {} returned no version id, is versioning enabled?",
                self.bucket_name
            ))
        })?;

        debug!(key, version_id, "Stored version");
        Ok(VersionHandle {
            version_id: version_id.to_string(),
            fingerprint: output.e_tag().unwrap_or("").to_string(),
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn get(
        &self,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<Option<StoredObject>, StoreError> {
        let result = Self::with_retry("get_object", key, || {
            self.s3_client
                .get_object()
                .bucket(&self.bucket_name)
                .key(key)
                .set_version_id(version_id.map(str::to_string))
                .send()
        })
        .await;

        let output = match result {
            Ok(output) => output,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    return Ok(None);
                }
                return Err(unavailable("get_object", service_error));
            }
        };

        let version_id = output.version_id().unwrap_or_default().to_string();
        let last_modified = to_chrono(output.last_modified());
        let metadata: ObjectMetadata = output
            .metadata()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        let body = output
            .body
            .collect()
            .await
            .map_err(|e| unavailable("get_object body", e))?
            .into_bytes()
            .to_vec();

        Ok(Some(StoredObject {
            key: key.to_string(),
            version_id,
            body,
            metadata,
            last_modified,
        }))
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_versions(&self, prefix: &str) -> Result<Vec<VersionInfo>, StoreError> {
        let mut listed = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut version_id_marker: Option<String> = None;

        loop {
            let output = Self::with_retry("list_object_versions", prefix, || {
                self.s3_client
                    .list_object_versions()
                    .bucket(&self.bucket_name)
                    .prefix(prefix)
                    .set_key_marker(key_marker.clone())
                    .set_version_id_marker(version_id_marker.clone())
                    .send()
            })
            .await
            .map_err(|e| unavailable("list_object_versions", e))?;

            for version in output.versions() {
                let (Some(key), Some(version_id)) = (version.key(), version.version_id()) else {
                    continue;
                };
                listed.push(VersionInfo {
                    key: key.to_string(),
                    version_id: version_id.to_string(),
                    fingerprint: version.e_tag().unwrap_or("").to_string(),
                    created_at: to_chrono(version.last_modified()),
                    is_latest: version.is_latest().unwrap_or(false),
                });
            }

            if output.is_truncated().unwrap_or(false) {
                key_marker = output.next_key_marker().map(str::to_string);
                version_id_marker = output.next_version_id_marker().map(str::to_string);
            } else {
                break;
            }
        }

        debug!(prefix, versions = listed.len(), "Listed versions");
        Ok(into_creation_order(listed))
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, key: &str, version_id: &str) -> Result<(), StoreError> {
        let result = Self::with_retry("delete_object", key, || {
            self.s3_client
                .delete_object()
                .bucket(&self.bucket_name)
                .key(key)
                .version_id(version_id)
                .send()
        })
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(unavailable("delete_object", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(key: &str, version_id: &str) -> VersionInfo {
        VersionInfo {
            key: key.to_string(),
            version_id: version_id.to_string(),
            fingerprint: String::new(),
            created_at: Utc::now(),
            is_latest: false,
        }
    }

    #[test]
    fn test_listing_is_reordered_oldest_first_per_key() {
        let listed = vec![
            info("1#", "c"),
            info("1#", "b"),
            info("1#", "a"),
            info("2#", "y"),
            info("2#", "x"),
        ];
        let ordered: Vec<_> = into_creation_order(listed)
            .into_iter()
            .map(|v| format!("{}{}", v.key, v.version_id))
            .collect();
        assert_eq!(ordered, vec!["1#a", "1#b", "1#c", "2#x", "2#y"]);
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient_status(429));
        assert!(is_transient_status(503));
        assert!(!is_transient_status(404));
        assert!(!is_transient_status(412));
    }
}
