use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;

/// Deletes the files uploaded within an upload session.
///
/// Deleting a session that was already cleaned up must succeed.
#[async_trait]
pub trait SessionCleanupService: Send + Sync {
    async fn delete_session(
        &self,
        session_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}
