use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, instrument, warn};
use vstore_core::{
    BinaryReferencedEvent, LogPosition, ObjectHistory, ObjectVersionCreatedEvent,
    ObjectVersionCreatingEvent, StoreError,
};

use super::{Job, JobSchedule};
use crate::config::{EventTopics, JobsConfig};
use crate::events::{EventEnvelope, EventReader, EventSender};

/// Summary of one processing iteration.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ObjectEventsReport {
    pub events: usize,
    pub versions_emitted: usize,
    pub binaries_emitted: usize,
    /// Events whose new version is not listed yet; left for redelivery.
    pub pending: usize,
    pub failed: usize,
}

enum Outcome {
    Emitted { versions: usize, binaries: usize },
    NotVisibleYet,
}

/// Confirms accepted mutations by diffing the object's version history.
///
/// Every history entry after the event's `current_version_id` becomes one
/// ObjectVersionCreated event. Redelivery can repeat emissions; consumers
/// de-duplicate by `(object_id, version_id)`.
pub struct ObjectEventsProcessingJob {
    reader: EventReader,
    sender: EventSender,
    history: Arc<dyn ObjectHistory>,
    topics: EventTopics,
    batch_size: usize,
    visibility_grace: Duration,
    idle: StdDuration,
}

impl ObjectEventsProcessingJob {
    pub fn new(
        reader: EventReader,
        sender: EventSender,
        history: Arc<dyn ObjectHistory>,
        topics: EventTopics,
        config: &JobsConfig,
    ) -> Self {
        Self {
            reader,
            sender,
            history,
            topics,
            batch_size: config.object_events_batch_size,
            visibility_grace: config.visibility_grace(),
            idle: config.idle_interval(),
        }
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<ObjectEventsReport, StoreError> {
        let batch = self
            .reader
            .read::<ObjectVersionCreatingEvent>(&self.topics.object_version_creating, self.batch_size)
            .await?;

        let mut report = ObjectEventsReport {
            events: batch.len(),
            ..ObjectEventsReport::default()
        };
        let mut processed: Vec<LogPosition> = Vec::with_capacity(batch.len());

        for envelope in batch {
            let object_id = envelope.event.object_id;
            match self.process(&envelope).await {
                Ok(Outcome::Emitted { versions, binaries }) => {
                    report.versions_emitted += versions;
                    report.binaries_emitted += binaries;
                    processed.push(envelope.position);
                }
                Ok(Outcome::NotVisibleYet) if now - envelope.timestamp < self.visibility_grace => {
                    debug!(object_id, "New version not listed yet, retrying later");
                    report.pending += 1;
                }
                Ok(Outcome::NotVisibleYet) => {
                    warn!(
                        object_id,
                        current_version_id = ?envelope.event.current_version_id,
                        "No version appeared after the accepted mutation, giving up"
                    );
                    processed.push(envelope.position);
                }
                Err(e) => {
                    error!(object_id, error = %e, "Failed to process object version event");
                    report.failed += 1;
                }
            }
        }

        self.reader.commit(&processed).await?;
        Ok(report)
    }

    async fn process(
        &self,
        envelope: &EventEnvelope<ObjectVersionCreatingEvent>,
    ) -> Result<Outcome, StoreError> {
        let event = &envelope.event;
        let history = self.history.versions(event.object_id).await?;

        let first_new = match &event.current_version_id {
            None => 0,
            Some(current) => history
                .iter()
                .position(|v| &v.version_id == current)
                .map(|i| i + 1)
                .ok_or_else(|| {
                    StoreError::DataInconsistency(format!(
                        "object {} has no version {}",
                        event.object_id, current
                    ))
                })?,
        };

        if first_new >= history.len() {
            return Ok(Outcome::NotVisibleYet);
        }

        let mut versions = 0;
        let mut binaries = 0;
        for (index, record) in history.iter().enumerate().skip(first_new) {
            let created = ObjectVersionCreatedEvent {
                object_id: event.object_id,
                version_id: record.version_id.clone(),
                version_index: index as u64 + 1,
                author: record.author.clone(),
                properties: record.properties.clone(),
                last_modified: record.last_modified,
            };
            self.sender
                .send(&self.topics.object_version_created, &created)
                .await?;
            versions += 1;

            for binary in &record.binaries {
                let referenced = BinaryReferencedEvent {
                    object_id: event.object_id,
                    object_version_id: record.version_id.clone(),
                    element_template_code: binary.element_template_code,
                    file_key: binary.file_key.clone(),
                    referenced_at: Some(record.last_modified),
                };
                self.sender
                    .send(&self.topics.binary_referenced, &referenced)
                    .await?;
                binaries += 1;
            }
        }

        debug!(object_id = event.object_id, versions, binaries, "Confirmed object versions");
        Ok(Outcome::Emitted { versions, binaries })
    }
}

#[async_trait]
impl Job for ObjectEventsProcessingJob {
    fn name(&self) -> &'static str {
        "object-events-processing"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Continuous { idle: self.idle }
    }

    async fn run_once(&self) -> Result<(), StoreError> {
        let report = self.run_once_at(Utc::now()).await?;
        if report.events > 0 {
            info!(
                events = report.events,
                versions = report.versions_emitted,
                binaries = report.binaries_emitted,
                pending = report.pending,
                failed = report.failed,
                "Object events iteration finished"
            );
        }
        Ok(())
    }
}
