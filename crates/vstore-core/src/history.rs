use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::ObjectId;

/// A binary referenced by an object version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryReference {
    pub element_template_code: i64,
    pub file_key: String,
}

/// One entry of an object's version history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectVersionRecord {
    pub version_id: String,
    pub author: Option<String>,
    pub properties: BTreeMap<String, String>,
    pub last_modified: DateTime<Utc>,
    pub binaries: Vec<BinaryReference>,
}

/// Source of an object's full version history.
#[async_trait]
pub trait ObjectHistory: Send + Sync {
    /// All versions of the object, oldest first. Empty if the object is unknown.
    async fn versions(&self, object_id: ObjectId) -> Result<Vec<ObjectVersionRecord>, StoreError>;
}
