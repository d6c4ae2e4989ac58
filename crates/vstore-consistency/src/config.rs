use serde::Deserialize;
use tracing::warn;

const DEFAULT_BINARY_LOOKBACK_SECS: u64 = 24 * 60 * 60;
const DEFAULT_VISIBILITY_GRACE_SECS: u64 = 5 * 60;

/// Topic names used by the producers and consumers of the consistency layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventTopics {
    pub session_creating: String,
    pub binary_used: String,
    pub binary_referenced: String,
    pub object_version_creating: String,
    pub object_version_created: String,
}

impl Default for EventTopics {
    fn default() -> Self {
        Self {
            session_creating: "vstore.session-creating".to_string(),
            binary_used: "vstore.binary-used".to_string(),
            binary_referenced: "vstore.binary-referenced".to_string(),
            object_version_creating: "vstore.object-version-creating".to_string(),
            object_version_created: "vstore.object-version-created".to_string(),
        }
    }
}

/// Tuning for the background jobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// SessionCreating events read per iteration.
    pub session_batch_size: usize,
    /// Page size used while scanning the BinaryUsed lookback window.
    pub binary_batch_size: usize,
    /// How far back BinaryUsed events are searched. Must exceed the worst-case
    /// delay between an upload and the finalize that uses it.
    pub binary_lookback_secs: u64,
    /// ObjectVersionCreating events read per iteration.
    pub object_events_batch_size: usize,
    /// How long an ObjectVersionCreating event may wait for its version to
    /// become visible in listings before it is committed as-is.
    pub visibility_grace_secs: u64,
    /// Pause between iterations of continuous jobs.
    pub idle_interval_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            session_batch_size: 500,
            binary_batch_size: 1000,
            binary_lookback_secs: DEFAULT_BINARY_LOOKBACK_SECS,
            object_events_batch_size: 100,
            visibility_grace_secs: DEFAULT_VISIBILITY_GRACE_SECS,
            idle_interval_secs: 5,
        }
    }
}

impl JobsConfig {
    /// Out-of-range values fall back to the default lookback.
    pub fn binary_lookback(&self) -> chrono::Duration {
        seconds_or_default(
            "binary_lookback_secs",
            self.binary_lookback_secs,
            DEFAULT_BINARY_LOOKBACK_SECS,
        )
    }

    /// Out-of-range values fall back to the default grace.
    pub fn visibility_grace(&self) -> chrono::Duration {
        seconds_or_default(
            "visibility_grace_secs",
            self.visibility_grace_secs,
            DEFAULT_VISIBILITY_GRACE_SECS,
        )
    }

    pub fn idle_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.idle_interval_secs)
    }
}

fn seconds_or_default(field: &str, secs: u64, default: u64) -> chrono::Duration {
    let parsed = i64::try_from(secs).ok().and_then(chrono::Duration::try_seconds);
    match parsed {
        Some(duration) => duration,
        None => {
            warn!(field, secs, default, "Duration out of range, using default");
            chrono::Duration::seconds(default as i64)
        }
    }
}
