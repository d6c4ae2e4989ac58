/// Errors surfaced by stores, event logs and the consistency layer.
///
/// Lock contention is not an error: acquisition reports it as a result value.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Event log error: {0}")]
    EventLog(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Data inconsistency: {0}")]
    DataInconsistency(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
