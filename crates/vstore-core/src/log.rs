use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Opaque position of a record in the log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogPosition {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
}

/// A consumed record.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub key: String,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub position: LogPosition,
}

/// Where a consume call starts reading.
///
/// Reads spanning partitions return records ordered by timestamp, ties broken
/// by partition then offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadFrom {
    /// Records not yet committed, oldest first. Uncommitted records are redelivered.
    Committed,
    /// Uncommitted records past a per-partition cursor: in a partition with a
    /// cursor, only offsets greater than it; partitions without one start at
    /// their oldest uncommitted record.
    CommittedAfter(Vec<LogPosition>),
    /// Records with `timestamp >= since` across all partitions, regardless of commits.
    Since(DateTime<Utc>),
    /// Records strictly after the given position, within its partition.
    After(LogPosition),
}

impl ReadFrom {
    /// Move `cursors` past `position` in its partition.
    pub fn advance(cursors: &mut Vec<LogPosition>, position: &LogPosition) {
        match cursors
            .iter_mut()
            .find(|c| c.topic == position.topic && c.partition == position.partition)
        {
            Some(cursor) if cursor.offset >= position.offset => {}
            Some(cursor) => cursor.offset = position.offset,
            None => cursors.push(position.clone()),
        }
    }
}

/// Append-only, partitioned event log with manual commit.
///
/// Ordering is guaranteed per key within a topic; delivery is at-least-once,
/// so every consumer must tolerate redelivery.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append a record keyed by `key`.
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
    ) -> Result<LogPosition, StoreError>;

    /// Read up to `max_batch` records.
    async fn consume(
        &self,
        topic: &str,
        from: &ReadFrom,
        max_batch: usize,
    ) -> Result<Vec<LogRecord>, StoreError>;

    /// Mark records as processed. Committing a position twice is a no-op.
    async fn commit(&self, positions: &[LogPosition]) -> Result<(), StoreError>;
}
