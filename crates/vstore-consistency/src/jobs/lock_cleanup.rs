use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};
use vstore_core::StoreError;

use super::{Job, JobSchedule};
use crate::lock::LockSessionManager;

/// Summary of one lock sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LockCleanupReport {
    pub inspected: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// One-shot sweep deleting locks whose holders never released them.
pub struct LockCleanupJob {
    manager: LockSessionManager,
}

impl LockCleanupJob {
    pub fn new(manager: LockSessionManager) -> Self {
        Self { manager }
    }

    /// Sweep every lock, judging expiration against `now`.
    ///
    /// Only listing the namespace can fail the sweep; per-lock failures are
    /// counted and the sweep moves on. Only the expired holder version that
    /// was inspected is deleted, never a lock re-acquired in the meantime.
    #[instrument(skip(self), level = "debug")]
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<LockCleanupReport, StoreError> {
        let mut report = LockCleanupReport::default();

        for root_id in self.manager.list_active().await? {
            report.inspected += 1;

            match self.manager.delete_expired_at(root_id, now).await {
                Ok(true) => {
                    info!(root_id, "Expired lock deleted");
                    report.deleted += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(root_id, error = %e, "Failed to sweep lock");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

#[async_trait]
impl Job for LockCleanupJob {
    fn name(&self) -> &'static str {
        "lock-cleanup"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::OneShot
    }

    async fn run_once(&self) -> Result<(), StoreError> {
        let report = self.sweep_at(Utc::now()).await?;
        info!(
            inspected = report.inspected,
            deleted = report.deleted,
            failed = report.failed,
            "Lock cleanup finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Duration;
    use vstore_local::MemoryObjectStore;

    use vstore_core::ObjectStore;

    use crate::lock::{LockRecord, LockSessionFactory};

    async fn setup(ids: &[(u64, i64)]) -> (Arc<MemoryObjectStore>, LockCleanupJob) {
        let store = Arc::new(MemoryObjectStore::new());
        let factory = LockSessionFactory::new(store.clone());
        for &(id, minutes) in ids {
            assert!(factory
                .acquire(id, Duration::minutes(minutes))
                .await
                .unwrap()
                .is_acquired());
        }
        let job = LockCleanupJob::new(LockSessionManager::new(store.clone()));
        (store, job)
    }

    #[tokio::test]
    async fn test_deletes_only_expired_locks() {
        let (store, job) = setup(&[(1, 5), (2, 60), (3, 10)]).await;

        let report = job.sweep_at(Utc::now() + Duration::minutes(30)).await.unwrap();
        assert_eq!(
            report,
            LockCleanupReport {
                inspected: 3,
                deleted: 2,
                failed: 0
            }
        );
        assert_eq!(store.version_count("1#").await, 0);
        assert_eq!(store.version_count("2#").await, 1);
        assert_eq!(store.version_count("3#").await, 0);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_others() {
        let (store, job) = setup(&[(1, 1), (2, 1), (3, 1)]).await;
        store.fail_deletes_for("2#").await;

        let report = job.sweep_at(Utc::now() + Duration::minutes(5)).await.unwrap();
        assert_eq!(report.deleted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(store.version_count("1#").await, 0);
        assert_eq!(store.version_count("2#").await, 1);
        assert_eq!(store.version_count("3#").await, 0);
    }

    #[tokio::test]
    async fn test_sweep_keeps_versions_written_after_the_expired_holder() {
        let (store, job) = setup(&[(6, 1)]).await;
        let live = LockRecord {
            expiration_date: Utc::now() + Duration::hours(2),
            unique_key: uuid::Uuid::new_v4(),
        };
        store
            .put(
                "6#",
                &serde_json::to_vec(&live).unwrap(),
                &vstore_core::ObjectMetadata::new(),
            )
            .await
            .unwrap();

        let report = job.sweep_at(Utc::now() + Duration::minutes(5)).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(store.version_count("6#").await, 1);
    }

    #[tokio::test]
    async fn test_listing_failure_fails_the_sweep() {
        let (store, job) = setup(&[(1, 1)]).await;
        store.set_unavailable(true);
        assert!(job.sweep_at(Utc::now()).await.is_err());
    }
}
