use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tracing::{debug, error, instrument, warn};
use vstore_core::{EventLog, LogPosition, LogRecord, ReadFrom, StoreError};

use super::EventEnvelope;

/// Reads typed events and commits their positions.
///
/// Delivery is at-least-once: callers commit only after their side effects
/// are durable and must tolerate seeing an event again. Records that do not
/// decode are logged and skipped; consuming reads also commit them so they
/// are not redelivered.
#[derive(Clone)]
pub struct EventReader {
    log: Arc<dyn EventLog>,
}

impl EventReader {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self { log }
    }

    /// Up to `batch_size` uncommitted events.
    #[instrument(skip(self), level = "debug")]
    pub async fn read<T: DeserializeOwned>(
        &self,
        topic: &str,
        batch_size: usize,
    ) -> Result<Vec<EventEnvelope<T>>, StoreError> {
        self.consume_uncommitted(topic, ReadFrom::Committed, batch_size)
            .await
    }

    /// Up to `batch_size` uncommitted events past `cursors`, one cursor per
    /// partition. Used to page through a backlog whose head stays uncommitted.
    #[instrument(skip(self), level = "debug")]
    pub async fn read_after<T: DeserializeOwned>(
        &self,
        topic: &str,
        cursors: &[LogPosition],
        batch_size: usize,
    ) -> Result<Vec<EventEnvelope<T>>, StoreError> {
        self.consume_uncommitted(topic, ReadFrom::CommittedAfter(cursors.to_vec()), batch_size)
            .await
    }

    /// Up to `batch_size` events published at or after `since`.
    #[instrument(skip(self), level = "debug")]
    pub async fn read_since<T: DeserializeOwned>(
        &self,
        topic: &str,
        since: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<Vec<EventEnvelope<T>>, StoreError> {
        let records = self
            .log
            .consume(topic, &ReadFrom::Since(since), batch_size.max(1))
            .await?;
        Ok(records.into_iter().filter_map(decode_or_skip).collect())
    }

    /// Every event published within `[since, until]`, across all partitions.
    ///
    /// Pages by timestamp, `batch_size` records at a time. Records sharing the
    /// timestamp a page ended on are re-read and skipped by position; if a
    /// whole page is such repeats, the page size doubles until it gets past
    /// them.
    #[instrument(skip(self), level = "debug")]
    pub async fn read_window<T: DeserializeOwned>(
        &self,
        topic: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<Vec<EventEnvelope<T>>, StoreError> {
        let mut page_size = batch_size.max(1);
        let mut from = since;
        let mut seen: HashSet<LogPosition> = HashSet::new();
        let mut events = Vec::new();
        let mut pages = 0usize;

        loop {
            let records = self
                .log
                .consume(topic, &ReadFrom::Since(from), page_size)
                .await?;
            pages += 1;
            let full = records.len() >= page_size;

            let mut fresh = 0usize;
            let mut past_until = false;
            for record in records {
                if record.timestamp > until {
                    past_until = true;
                    break;
                }
                if !seen.insert(record.position.clone()) {
                    continue;
                }
                fresh += 1;
                from = from.max(record.timestamp);
                if let Some(event) = decode_or_skip(record) {
                    events.push(event);
                }
            }

            if past_until || !full {
                break;
            }
            if fresh == 0 {
                page_size = page_size.saturating_mul(2);
            }
        }

        debug!(topic, pages, events = events.len(), "Read event window");
        Ok(events)
    }

    /// Commit processed positions. Re-committing is harmless.
    pub async fn commit(&self, positions: &[LogPosition]) -> Result<(), StoreError> {
        if positions.is_empty() {
            return Ok(());
        }
        self.log.commit(positions).await
    }

    async fn consume_uncommitted<T: DeserializeOwned>(
        &self,
        topic: &str,
        from: ReadFrom,
        batch_size: usize,
    ) -> Result<Vec<EventEnvelope<T>>, StoreError> {
        let records = self.log.consume(topic, &from, batch_size.max(1)).await?;

        let mut events = Vec::with_capacity(records.len());
        let mut undecodable = Vec::new();
        for record in records {
            let position = record.position.clone();
            match decode(record) {
                Ok(event) => events.push(event),
                Err(e) => {
                    error!(error = %e, "Dropping undecodable event");
                    undecodable.push(position);
                }
            }
        }

        self.commit(&undecodable).await?;
        Ok(events)
    }
}

fn decode<T: DeserializeOwned>(record: LogRecord) -> Result<EventEnvelope<T>, StoreError> {
    let event = serde_json::from_slice(&record.payload).map_err(|e| {
        StoreError::Serialization(format!(
            "undecodable event at {}/{}/{}: {}",
            record.position.topic, record.position.partition, record.position.offset, e
        ))
    })?;
    Ok(EventEnvelope {
        event,
        position: record.position,
        timestamp: record.timestamp,
    })
}

fn decode_or_skip<T: DeserializeOwned>(record: LogRecord) -> Option<EventEnvelope<T>> {
    match decode(record) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "Skipping undecodable event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;
    use vstore_core::{ObjectVersionCreatingEvent, SessionCreatingEvent};
    use vstore_local::MemoryEventLog;

    use crate::events::EventSender;

    #[tokio::test]
    async fn test_send_then_read_and_commit() {
        let log = Arc::new(MemoryEventLog::new());
        let sender = EventSender::new(log.clone());
        let reader = EventReader::new(log.clone());

        let event = ObjectVersionCreatingEvent {
            object_id: 42,
            current_version_id: Some("v1".to_string()),
        };
        sender.send("creating", &event).await.unwrap();

        let batch: Vec<EventEnvelope<ObjectVersionCreatingEvent>> =
            reader.read("creating", 10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].event, event);
        assert_eq!(log.records("creating").await[0].key, "42");

        let positions = vec![batch[0].position.clone()];
        reader.commit(&positions).await.unwrap();
        reader.commit(&positions).await.unwrap();
        let again: Vec<EventEnvelope<ObjectVersionCreatingEvent>> =
            reader.read("creating", 10).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_read_window_pages_through_everything() {
        let log = Arc::new(MemoryEventLog::new());
        let reader = EventReader::new(log.clone());
        let start = Utc::now();

        for i in 0..25 {
            let event = SessionCreatingEvent {
                session_id: Uuid::new_v4(),
                expires_at: start,
            };
            log.publish_at(
                "sessions",
                &event.session_id.to_string(),
                serde_json::to_vec(&event).unwrap(),
                start + Duration::seconds(i),
            )
            .await
            .unwrap();
        }

        let window: Vec<EventEnvelope<SessionCreatingEvent>> = reader
            .read_window(
                "sessions",
                start + Duration::seconds(5),
                start + Duration::seconds(19),
                4,
            )
            .await
            .unwrap();
        assert_eq!(window.len(), 15);
        assert_eq!(window[0].position.offset, 5);
        assert_eq!(window[14].position.offset, 19);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_skipped_and_committed() {
        let log = Arc::new(MemoryEventLog::new());
        let reader = EventReader::new(log.clone());
        log.publish("t", "k", b"{broken".to_vec()).await.unwrap();
        let event = SessionCreatingEvent {
            session_id: Uuid::new_v4(),
            expires_at: Utc::now(),
        };
        EventSender::new(log.clone()).send("t", &event).await.unwrap();

        let batch: Vec<EventEnvelope<SessionCreatingEvent>> = reader.read("t", 10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].event, event);
        assert_eq!(log.committed_count("t").await, 1);

        let again: Vec<EventEnvelope<SessionCreatingEvent>> = reader.read("t", 10).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].position.offset, 1);
    }

    #[tokio::test]
    async fn test_read_window_spans_partitions() {
        let log = Arc::new(MemoryEventLog::with_partitions(2));
        let reader = EventReader::new(log.clone());
        let start = Utc::now();

        // Interleaved across partitions; pages of 2 must still see all of them.
        for (i, partition) in [1, 1, 0, 1, 0, 0].into_iter().enumerate() {
            log.publish_to_at(
                "used",
                partition,
                "k",
                serde_json::to_vec(&i).unwrap(),
                start + Duration::seconds(i as i64),
            )
            .await
            .unwrap();
        }

        let window: Vec<EventEnvelope<usize>> = reader
            .read_window("used", start, start + Duration::seconds(4), 2)
            .await
            .unwrap();
        let seen: Vec<_> = window.iter().map(|e| e.event).collect();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_read_window_gets_past_timestamp_ties() {
        let log = Arc::new(MemoryEventLog::with_partitions(3));
        let reader = EventReader::new(log.clone());
        let at = Utc::now();

        for i in 0..7usize {
            log.publish_to_at("used", (i % 3) as u32, "k", serde_json::to_vec(&i).unwrap(), at)
                .await
                .unwrap();
        }

        let window: Vec<EventEnvelope<usize>> =
            reader.read_window("used", at, at, 2).await.unwrap();
        let mut seen: Vec<_> = window.iter().map(|e| e.event).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..7).collect::<Vec<_>>());
    }
}
