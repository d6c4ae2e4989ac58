use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};
use uuid::Uuid;
use vstore_core::keys::session_prefix;
use vstore_core::{ObjectStore, SessionCleanupService, StoreError};

/// Removes a session's uploads from the files store.
///
/// Every version under `{session_id}/` is deleted. Running it twice is a
/// no-op the second time.
pub struct StoreSessionCleanup {
    files: Arc<dyn ObjectStore>,
}

impl StoreSessionCleanup {
    pub fn new(files: Arc<dyn ObjectStore>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl SessionCleanupService for StoreSessionCleanup {
    #[instrument(skip(self), level = "debug")]
    async fn delete_session(
        &self,
        session_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let prefix = session_prefix(session_id);
        let versions = self.files.list_versions(&prefix).await?;

        let mut first_error = None;
        let mut deleted = 0usize;
        for version in &versions {
            match self.files.delete(&version.key, &version.version_id).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    warn!(key = %version.key, version_id = %version.version_id, error = %e, "Failed to delete session file");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        debug!(%session_id, deleted, total = versions.len(), "Session files purged");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
