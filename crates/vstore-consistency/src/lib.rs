//! Consistency layer for vstore.
//!
//! - `lock`: mutual exclusion per root object, built from put/list/delete
//! - `events`: typed wrappers over the event log
//! - `jobs`: lock sweeping, upload garbage collection and version confirmation
//! - `cleanup` / `history`: default collaborators backed by an object store

pub mod cleanup;
pub mod config;
pub mod events;
pub mod history;
pub mod jobs;
pub mod lock;

pub use cleanup::StoreSessionCleanup;
pub use config::{EventTopics, JobsConfig};
pub use events::{EventEnvelope, EventReader, EventSender};
pub use history::StoreObjectHistory;
pub use jobs::{
    BinariesCleanupJob, Job, JobRegistry, JobRunner, JobSchedule, LockCleanupJob,
    ObjectEventsProcessingJob,
};
pub use lock::{LockAcquireResult, LockRecord, LockSession, LockSessionFactory, LockSessionManager};
