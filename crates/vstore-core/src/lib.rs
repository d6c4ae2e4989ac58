//! Core traits and types for the vstore consistency layer.
//!
//! This crate defines the contracts shared between backends and the consistency layer:
//! - `ObjectStore`: Versioned put/get/list-versions/delete over keyed objects
//! - `EventLog`: Topic-based publish/consume/commit with at-least-once delivery
//! - `SessionCleanupService`: Deletion of an upload session's files
//! - `ObjectHistory`: Creation-ordered version history of a root object
//!
//! plus the event payloads and the key encodings every component agrees on.

mod cleanup;
mod error;
mod events;
mod history;
pub mod keys;
mod log;
mod storage;

pub use cleanup::SessionCleanupService;
pub use error::StoreError;
pub use events::{
    BinaryReferencedEvent, BinaryUsedEvent, Event, ObjectVersionCreatedEvent,
    ObjectVersionCreatingEvent, SessionCreatedEvent, SessionCreatingEvent,
};
pub use history::{BinaryReference, ObjectHistory, ObjectVersionRecord};
pub use log::{EventLog, LogPosition, LogRecord, ReadFrom};
pub use storage::{
    versions_of, ObjectMetadata, ObjectStore, StoredObject, VersionHandle, VersionInfo,
};

/// Numeric identifier of a root object (the entity a lock protects).
pub type ObjectId = u64;
