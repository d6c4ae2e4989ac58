use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use vstore_core::{EventLog, LogPosition, LogRecord, ReadFrom, StoreError};

#[derive(Default)]
struct Partition {
    records: Vec<LogRecord>,
    committed: BTreeSet<u64>,
}

impl Partition {
    fn is_committed(&self, offset: u64) -> bool {
        self.committed.contains(&offset)
    }
}

/// Partitioned in-memory event log.
///
/// Records are routed to a partition by a stable hash of their key, so
/// ordering holds per key. Commits are per record: a `Committed` read returns
/// the oldest records that have not been committed yet, so anything left
/// uncommitted is redelivered on the next read.
pub struct MemoryEventLog {
    partitions: u32,
    topics: RwLock<HashMap<String, Vec<Partition>>>,
    unavailable: AtomicBool,
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::with_partitions(1)
    }
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A log whose topics have `partitions` partitions (at least one).
    pub fn with_partitions(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
            topics: RwLock::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every operation fail with `EventLog`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Partition a key is routed to.
    pub fn partition_for(&self, key: &str) -> u32 {
        // FNV-1a
        let hash = key.bytes().fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
            (h ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
        });
        (hash % u64::from(self.partitions)) as u32
    }

    /// Append a record with an explicit timestamp.
    pub async fn publish_at(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
        timestamp: DateTime<Utc>,
    ) -> Result<LogPosition, StoreError> {
        self.publish_to_at(topic, self.partition_for(key), key, payload, timestamp)
            .await
    }

    /// Append a record to an explicit partition with an explicit timestamp.
    pub async fn publish_to_at(
        &self,
        topic: &str,
        partition: u32,
        key: &str,
        payload: Vec<u8>,
        timestamp: DateTime<Utc>,
    ) -> Result<LogPosition, StoreError> {
        tokio::task::yield_now().await;
        self.check_available()?;
        if partition >= self.partitions {
            return Err(StoreError::EventLog(format!(
                "partition {} out of range for {} partitions",
                partition, self.partitions
            )));
        }

        let mut topics = self.topics.write().await;
        let log = self.topic_mut(&mut topics, topic);
        let records = &mut log[partition as usize].records;
        let position = LogPosition {
            topic: topic.to_string(),
            partition,
            offset: records.len() as u64,
        };
        records.push(LogRecord {
            key: key.to_string(),
            payload,
            timestamp,
            position: position.clone(),
        });

        debug!(topic, key, partition, offset = position.offset, "Published record");
        Ok(position)
    }

    /// Every record of a topic, committed or not, partition by partition.
    pub async fn records(&self, topic: &str) -> Vec<LogRecord> {
        self.topics
            .read()
            .await
            .get(topic)
            .map(|log| {
                log.iter()
                    .flat_map(|p| p.records.iter().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of committed records in a topic.
    pub async fn committed_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .map(|log| log.iter().map(|p| p.committed.len()).sum())
            .unwrap_or(0)
    }

    fn topic_mut<'a>(
        &self,
        topics: &'a mut HashMap<String, Vec<Partition>>,
        topic: &str,
    ) -> &'a mut Vec<Partition> {
        topics.entry(topic.to_string()).or_insert_with(|| {
            (0..self.partitions).map(|_| Partition::default()).collect()
        })
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::EventLog(
                "memory event log marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

fn past_cursor(cursors: &[LogPosition], record: &LogPosition) -> bool {
    cursors
        .iter()
        .find(|c| c.topic == record.topic && c.partition == record.partition)
        .map_or(true, |c| record.offset > c.offset)
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
    ) -> Result<LogPosition, StoreError> {
        self.publish_at(topic, key, payload, Utc::now()).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn consume(
        &self,
        topic: &str,
        from: &ReadFrom,
        max_batch: usize,
    ) -> Result<Vec<LogRecord>, StoreError> {
        tokio::task::yield_now().await;
        self.check_available()?;

        let topics = self.topics.read().await;
        let Some(log) = topics.get(topic) else {
            return Ok(Vec::new());
        };

        if let ReadFrom::After(position) = from {
            if position.topic != topic {
                return Ok(Vec::new());
            }
            let batch = log
                .get(position.partition as usize)
                .map(|p| {
                    p.records
                        .iter()
                        .filter(|r| r.position.offset > position.offset)
                        .take(max_batch)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            return Ok(batch);
        }

        let mut matching: Vec<&LogRecord> = log
            .iter()
            .flat_map(|p| p.records.iter().map(move |r| (p, r)))
            .filter(|(p, r)| match from {
                ReadFrom::Committed => !p.is_committed(r.position.offset),
                ReadFrom::CommittedAfter(cursors) => {
                    !p.is_committed(r.position.offset) && past_cursor(cursors, &r.position)
                }
                ReadFrom::Since(since) => r.timestamp >= *since,
                ReadFrom::After(_) => false,
            })
            .map(|(_, r)| r)
            .collect();
        matching.sort_by_key(|r| (r.timestamp, r.position.partition, r.position.offset));

        Ok(matching.into_iter().take(max_batch).cloned().collect())
    }

    #[instrument(skip(self, positions), level = "debug", fields(count = positions.len()))]
    async fn commit(&self, positions: &[LogPosition]) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.check_available()?;

        let mut topics = self.topics.write().await;
        for position in positions {
            let partition = topics
                .get_mut(&position.topic)
                .and_then(|log| log.get_mut(position.partition as usize))
                .ok_or_else(|| {
                    StoreError::EventLog(format!(
                        "unknown partition {}/{}",
                        position.topic, position.partition
                    ))
                })?;
            if position.offset >= partition.records.len() as u64 {
                return Err(StoreError::EventLog(format!(
                    "offset {} was never delivered on {}/{}",
                    position.offset, position.topic, position.partition
                )));
            }
            partition.committed.insert(position.offset);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_uncommitted_records_are_redelivered() {
        let log = MemoryEventLog::new();
        for i in 0..3 {
            log.publish("t", "k", vec![i]).await.unwrap();
        }

        let first = log.consume("t", &ReadFrom::Committed, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        log.commit(&[first[1].position.clone()]).await.unwrap();

        let second = log.consume("t", &ReadFrom::Committed, 10).await.unwrap();
        let offsets: Vec<_> = second.iter().map(|r| r.position.offset).collect();
        assert_eq!(offsets, vec![0, 2]);
    }

    #[tokio::test]
    async fn test_double_commit_is_noop() {
        let log = MemoryEventLog::new();
        let position = log.publish("t", "k", b"x".to_vec()).await.unwrap();

        log.commit(&[position.clone()]).await.unwrap();
        log.commit(&[position.clone(), position]).await.unwrap();

        assert_eq!(log.committed_count("t").await, 1);
        assert!(log
            .consume("t", &ReadFrom::Committed, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_since_and_after_reads() {
        let log = MemoryEventLog::new();
        let start = Utc::now();
        for i in 0..4 {
            log.publish_at("t", "k", vec![i], start + Duration::minutes(i as i64))
                .await
                .unwrap();
        }

        let since = log
            .consume("t", &ReadFrom::Since(start + Duration::minutes(2)), 10)
            .await
            .unwrap();
        assert_eq!(since.len(), 2);

        let after = log
            .consume("t", &ReadFrom::After(since[0].position.clone()), 10)
            .await
            .unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].payload, vec![3]);
    }

    #[tokio::test]
    async fn test_commit_of_unknown_position_fails() {
        let log = MemoryEventLog::new();
        log.publish("t", "k", vec![]).await.unwrap();
        let bogus = LogPosition {
            topic: "t".to_string(),
            partition: 0,
            offset: 99,
        };
        assert!(matches!(
            log.commit(&[bogus]).await,
            Err(StoreError::EventLog(_))
        ));
    }

    #[tokio::test]
    async fn test_partitions_merge_by_timestamp() {
        let log = MemoryEventLog::with_partitions(2);
        let start = Utc::now();
        log.publish_to_at("t", 1, "a", vec![1], start + Duration::seconds(1))
            .await
            .unwrap();
        log.publish_to_at("t", 0, "b", vec![0], start).await.unwrap();
        log.publish_to_at("t", 0, "c", vec![2], start + Duration::seconds(2))
            .await
            .unwrap();

        let since = log.consume("t", &ReadFrom::Since(start), 10).await.unwrap();
        let payloads: Vec<_> = since.iter().map(|r| r.payload[0]).collect();
        assert_eq!(payloads, vec![0, 1, 2]);

        // After stays inside the partition of its position.
        let after = log
            .consume("t", &ReadFrom::After(since[0].position.clone()), 10)
            .await
            .unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].payload, vec![2]);
        assert!(log
            .publish_to_at("t", 2, "d", vec![], start)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_committed_after_skips_past_cursors() {
        let log = MemoryEventLog::with_partitions(2);
        let start = Utc::now();
        for i in 0..3u8 {
            log.publish_to_at("t", 0, "a", vec![i], start + Duration::seconds(i.into()))
                .await
                .unwrap();
        }
        let other = log
            .publish_to_at("t", 1, "b", vec![9], start)
            .await
            .unwrap();

        let first = log.consume("t", &ReadFrom::Committed, 2).await.unwrap();
        let mut cursors = Vec::new();
        for record in &first {
            ReadFrom::advance(&mut cursors, &record.position);
        }
        log.commit(&[other]).await.unwrap();

        let rest = log
            .consume("t", &ReadFrom::CommittedAfter(cursors), 10)
            .await
            .unwrap();
        let payloads: Vec<_> = rest.iter().map(|r| r.payload[0]).collect();
        assert_eq!(payloads, vec![1, 2]);
    }
}
