//! Event payloads published to the event log.
//!
//! Payloads are flat JSON objects with camelCase field names and RFC 3339 UTC
//! timestamps. Map-valued fields use ordered maps so serialization is stable.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ObjectId;

/// An event that can be published to the log.
pub trait Event: Serialize + DeserializeOwned + Send + Sync {
    /// Partition key. Ordering holds per key.
    fn key(&self) -> String;
}

/// An upload session was opened; its files may be reclaimed after `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreatingEvent {
    pub session_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl Event for SessionCreatingEvent {
    fn key(&self) -> String {
        self.session_id.to_string()
    }
}

/// An upload session was confirmed as created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreatedEvent {
    pub session_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl Event for SessionCreatedEvent {
    fn key(&self) -> String {
        self.session_id.to_string()
    }
}

/// A binary was attached to a finalized object version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryUsedEvent {
    pub object_id: ObjectId,
    pub object_version_id: String,
    pub element_template_code: i64,
    pub file_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_at: Option<DateTime<Utc>>,
}

impl BinaryUsedEvent {
    /// Upload session owning the binary, if the file key carries one.
    pub fn session_id(&self) -> Option<Uuid> {
        crate::keys::session_id_of(&self.file_key)
    }
}

impl Event for BinaryUsedEvent {
    fn key(&self) -> String {
        self.object_id.to_string()
    }
}

/// A confirmed object version references a binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryReferencedEvent {
    pub object_id: ObjectId,
    pub object_version_id: String,
    pub element_template_code: i64,
    pub file_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_at: Option<DateTime<Utc>>,
}

impl Event for BinaryReferencedEvent {
    fn key(&self) -> String {
        self.file_key.clone()
    }
}

/// A mutation of an object was accepted on top of `current_version_id`.
///
/// `current_version_id` is `None` when the object did not exist yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectVersionCreatingEvent {
    pub object_id: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version_id: Option<String>,
}

impl Event for ObjectVersionCreatingEvent {
    fn key(&self) -> String {
        self.object_id.to_string()
    }
}

/// A version is visible in the object's history.
///
/// `version_index` is the 1-based position of the version in the full
/// creation-order history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectVersionCreatedEvent {
    pub object_id: ObjectId,
    pub version_id: String,
    pub version_index: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    pub last_modified: DateTime<Utc>,
}

impl Event for ObjectVersionCreatedEvent {
    fn key(&self) -> String {
        self.object_id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_session_creating_wire_format() {
        let session_id = Uuid::parse_str("6f1c3f3e-8f53-4a57-9f64-2f1f7f7c0b11").unwrap();
        let event = SessionCreatingEvent {
            session_id,
            expires_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"sessionId":"6f1c3f3e-8f53-4a57-9f64-2f1f7f7c0b11","expiresAt":"2024-03-01T12:30:00Z"}"#
        );
        assert_eq!(event.key(), session_id.to_string());
    }

    #[test]
    fn test_version_created_properties_are_ordered() {
        let mut properties = BTreeMap::new();
        properties.insert("zeta".to_string(), "1".to_string());
        properties.insert("alpha".to_string(), "2".to_string());

        let event = ObjectVersionCreatedEvent {
            object_id: 42,
            version_id: "v2".to_string(),
            version_index: 2,
            author: None,
            properties,
            last_modified: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"objectId":42,"versionId":"v2","versionIndex":2,"properties":{"alpha":"2","zeta":"1"},"lastModified":"2024-03-01T00:00:00Z"}"#
        );
    }

    #[test]
    fn test_creating_without_current_version() {
        let event: ObjectVersionCreatingEvent = serde_json::from_str(r#"{"objectId":7}"#).unwrap();
        assert_eq!(event.object_id, 7);
        assert!(event.current_version_id.is_none());
        assert_eq!(event.key(), "7");
    }

    #[test]
    fn test_binary_used_session_id() {
        let session_id = Uuid::new_v4();
        let event = BinaryUsedEvent {
            object_id: 1,
            object_version_id: "v1".to_string(),
            element_template_code: 3,
            file_key: crate::keys::file_key(session_id, "scan.pdf"),
            referenced_at: None,
        };
        assert_eq!(event.session_id(), Some(session_id));
    }
}
