//! vstore consistency layer.
//!
//! Re-exports the crates of the workspace under one roof:
//! - [`core`]: storage and event log contracts, event types, keys
//! - [`consistency`]: locks, typed events and background jobs
//! - [`local`]: in-memory backends for tests and embedding

pub use vstore_consistency as consistency;
pub use vstore_core as core;
pub use vstore_local as local;

pub use vstore_consistency::{
    BinariesCleanupJob, EventReader, EventSender, EventTopics, JobRegistry, JobRunner, JobsConfig,
    LockAcquireResult, LockCleanupJob, LockSession, LockSessionFactory, LockSessionManager,
    ObjectEventsProcessingJob, StoreObjectHistory, StoreSessionCleanup,
};
pub use vstore_core::{EventLog, ObjectId, ObjectStore, StoreError};
