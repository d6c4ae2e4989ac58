use std::sync::Arc;

use tracing::{debug, instrument};
use vstore_core::{Event, EventLog, LogPosition, StoreError};

/// Publishes events keyed by their logical entity id.
#[derive(Clone)]
pub struct EventSender {
    log: Arc<dyn EventLog>,
}

impl EventSender {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self { log }
    }

    #[instrument(skip(self, event), level = "debug")]
    pub async fn send<E: Event>(&self, topic: &str, event: &E) -> Result<LogPosition, StoreError> {
        let key = event.key();
        let payload = serde_json::to_vec(event)?;
        let position = self.log.publish(topic, &key, payload).await?;
        debug!(topic, key, offset = position.offset, "Sent event");
        Ok(position)
    }
}
