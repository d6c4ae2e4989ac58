use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};
use vstore_core::keys::object_key;
use vstore_core::{
    versions_of, BinaryReference, ObjectHistory, ObjectId, ObjectMetadata, ObjectStore,
    ObjectVersionRecord, StoreError,
};

/// Metadata key holding the version's author.
pub const AUTHOR_KEY: &str = "author";
/// Metadata key holding a JSON object of string properties.
pub const PROPERTIES_KEY: &str = "properties";
/// Metadata key holding a JSON array of binary references.
pub const BINARIES_KEY: &str = "binaries";

/// Version history read straight from the objects store.
///
/// The history of object `id` is the version list of `{id}/root`, each
/// version carrying its descriptive data in user metadata.
pub struct StoreObjectHistory {
    objects: Arc<dyn ObjectStore>,
}

impl StoreObjectHistory {
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self { objects }
    }
}

#[async_trait]
impl ObjectHistory for StoreObjectHistory {
    #[instrument(skip(self), level = "debug")]
    async fn versions(&self, object_id: ObjectId) -> Result<Vec<ObjectVersionRecord>, StoreError> {
        let key = object_key(object_id);
        let listed = versions_of(self.objects.as_ref(), &key).await?;

        let mut history = Vec::with_capacity(listed.len());
        for info in listed {
            let stored = self
                .objects
                .get(&key, Some(&info.version_id))
                .await?
                .ok_or_else(|| {
                    StoreError::DataInconsistency(format!(
                        "version {} of {} listed but not readable",
                        info.version_id, key
                    ))
                })?;
            history.push(record_from_metadata(
                info.version_id,
                &stored.metadata,
                stored.last_modified,
            )?);
        }

        debug!(object_id, versions = history.len(), "Loaded object history");
        Ok(history)
    }
}

fn record_from_metadata(
    version_id: String,
    metadata: &ObjectMetadata,
    last_modified: chrono::DateTime<chrono::Utc>,
) -> Result<ObjectVersionRecord, StoreError> {
    let properties: BTreeMap<String, String> = match metadata.get(PROPERTIES_KEY) {
        Some(raw) => serde_json::from_str(raw)?,
        None => BTreeMap::new(),
    };
    let binaries: Vec<BinaryReference> = match metadata.get(BINARIES_KEY) {
        Some(raw) => serde_json::from_str(raw)?,
        None => Vec::new(),
    };

    Ok(ObjectVersionRecord {
        version_id,
        author: metadata.get(AUTHOR_KEY).cloned(),
        properties,
        last_modified,
        binaries,
    })
}
