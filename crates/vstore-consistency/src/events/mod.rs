//! Typed publish/consume/commit over the event log.

mod reader;
mod sender;

use chrono::{DateTime, Utc};
use vstore_core::LogPosition;

pub use reader::EventReader;
pub use sender::EventSender;

/// A decoded event with the log position needed to commit it.
#[derive(Debug, Clone)]
pub struct EventEnvelope<T> {
    pub event: T,
    pub position: LogPosition,
    pub timestamp: DateTime<Utc>,
}
