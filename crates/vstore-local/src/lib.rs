//! In-memory backends for the vstore contracts.
//!
//! Used by tests and by single-process embeddings. Both backends yield to the
//! runtime before every operation so that concurrently polled callers
//! interleave the way they would against a network store.

mod event_log;
mod object_store;

pub use event_log::MemoryEventLog;
pub use object_store::MemoryObjectStore;
