use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use vstore_core::{
    BinaryUsedEvent, LogPosition, ReadFrom, SessionCleanupService, SessionCreatingEvent,
    StoreError,
};

use super::{Job, JobSchedule};
use crate::config::{EventTopics, JobsConfig};
use crate::events::{EventEnvelope, EventReader};

/// Summary of one cleanup iteration.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BinariesCleanupReport {
    /// Expired sessions seen in the batch.
    pub expired: usize,
    /// Sessions whose files were deleted.
    pub deleted: usize,
    /// Expired sessions kept because a binary of theirs is in use.
    pub retained: usize,
    /// Sessions whose deletion failed; they stay uncommitted.
    pub failed: usize,
}

/// Deletes the uploads of expired sessions that no object ended up using.
///
/// Safety is bounded by the lookback window: a session whose binaries were
/// used earlier than `now - lookback` looks unused.
pub struct BinariesCleanupJob {
    reader: EventReader,
    cleanup: Arc<dyn SessionCleanupService>,
    topics: EventTopics,
    lookback: Duration,
    session_batch_size: usize,
    binary_batch_size: usize,
    idle: StdDuration,
}

impl BinariesCleanupJob {
    pub fn new(
        reader: EventReader,
        cleanup: Arc<dyn SessionCleanupService>,
        topics: EventTopics,
        config: &JobsConfig,
    ) -> Self {
        Self {
            reader,
            cleanup,
            topics,
            lookback: config.binary_lookback(),
            session_batch_size: config.session_batch_size,
            binary_batch_size: config.binary_batch_size,
            idle: config.idle_interval(),
        }
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<BinariesCleanupReport, StoreError> {
        let mut report = BinariesCleanupReport::default();

        let expired = self.expired_sessions(now).await?;
        if expired.is_empty() {
            return Ok(report);
        }
        report.expired = expired.len();

        let used = self
            .reader
            .read_window::<BinaryUsedEvent>(
                &self.topics.binary_used,
                now - self.lookback,
                now,
                self.binary_batch_size,
            )
            .await?;
        let used_sessions: HashSet<Uuid> =
            used.iter().filter_map(|e| e.event.session_id()).collect();
        debug!(
            expired = report.expired,
            used_sessions = used_sessions.len(),
            "Reconciling expired sessions"
        );

        for envelope in expired {
            let session_id = envelope.event.session_id;

            if used_sessions.contains(&session_id) {
                debug!(%session_id, "Session binaries in use, keeping files");
                report.retained += 1;
            } else {
                match self
                    .cleanup
                    .delete_session(session_id, envelope.event.expires_at)
                    .await
                {
                    Ok(()) => {
                        info!(%session_id, "Deleted files of unused session");
                        report.deleted += 1;
                    }
                    Err(e) => {
                        warn!(%session_id, error = %e, "Failed to delete session files");
                        report.failed += 1;
                        continue;
                    }
                }
            }

            self.reader.commit(&[envelope.position]).await?;
        }

        Ok(report)
    }

    /// Up to `session_batch_size` expired sessions from the uncommitted backlog.
    ///
    /// Unexpired sessions stay uncommitted at the head of the log, so the scan
    /// pages past them with per-partition cursors instead of stopping at the
    /// first batch.
    async fn expired_sessions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<EventEnvelope<SessionCreatingEvent>>, StoreError> {
        let batch_size = self.session_batch_size.max(1);
        let topic = &self.topics.session_creating;
        let mut cursors: Vec<LogPosition> = Vec::new();
        let mut expired = Vec::new();
        let mut scanned = 0usize;

        loop {
            let page = if cursors.is_empty() {
                self.reader.read::<SessionCreatingEvent>(topic, batch_size).await?
            } else {
                self.reader
                    .read_after::<SessionCreatingEvent>(topic, &cursors, batch_size)
                    .await?
            };
            let page_len = page.len();
            scanned += page_len;

            for envelope in page {
                ReadFrom::advance(&mut cursors, &envelope.position);
                if envelope.event.expires_at <= now {
                    expired.push(envelope);
                }
            }

            // A short page may only mean undecodable records were dropped.
            if page_len == 0 || expired.len() >= batch_size {
                break;
            }
        }

        debug!(scanned, expired = expired.len(), "Scanned session backlog");
        Ok(expired)
    }
}

#[async_trait]
impl Job for BinariesCleanupJob {
    fn name(&self) -> &'static str {
        "binaries-cleanup"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Continuous { idle: self.idle }
    }

    async fn run_once(&self) -> Result<(), StoreError> {
        let report = self.run_once_at(Utc::now()).await?;
        if report.expired > 0 {
            info!(
                expired = report.expired,
                deleted = report.deleted,
                retained = report.retained,
                failed = report.failed,
                "Binaries cleanup iteration finished"
            );
        }
        Ok(())
    }
}
