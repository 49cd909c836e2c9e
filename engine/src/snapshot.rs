//! Snapshot types for persisting and restoring the live cache.
//!
//! Snapshots are the bridge between the in-memory [`Store`](crate::Store)
//! and whatever persistence the host provides. They serialize
//! deterministically: models and documents are ordered by name and id.

use crate::{error::Result, DocId, Document, Error, ModelName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time copy of every document in the live cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Documents by model, then by id. Registered models without
    /// documents are kept as empty maps.
    pub models: BTreeMap<ModelName, BTreeMap<DocId, Document>>,
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            models: BTreeMap::new(),
        }
    }

    /// Add a model with no documents.
    pub fn add_model(&mut self, model: impl Into<ModelName>) {
        self.models.entry(model.into()).or_default();
    }

    /// Add a document to the snapshot.
    pub fn add_document(&mut self, model: impl Into<ModelName>, doc: Document) {
        self.models
            .entry(model.into())
            .or_default()
            .insert(doc.id().to_owned(), doc);
    }

    pub fn get_document(&self, model: &str, id: &str) -> Option<&Document> {
        self.models.get(model)?.get(id)
    }

    /// Count documents across all models.
    pub fn document_count(&self) -> usize {
        self.models.values().map(BTreeMap::len).sum()
    }

    /// Check that every document is filed under its own id.
    pub fn validate(&self) -> Result<()> {
        for (model, docs) in &self.models {
            for (id, doc) in docs {
                if doc.id() != id {
                    return Err(Error::InvalidSnapshot(format!(
                        "{model}/{id} holds document `{}`",
                        doc.id()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        snapshot.validate()?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[test]
    fn create_empty_snapshot() {
        let snapshot = StoreSnapshot::new();
        assert_eq!(snapshot.format_version, SNAPSHOT_FORMAT_VERSION);
        assert_eq!(snapshot.document_count(), 0);
    }

    #[test]
    fn add_and_get_document() {
        let mut snapshot = StoreSnapshot::new();
        snapshot.add_model("Author");
        snapshot.add_document("Book", doc(json!({"_id": "b1", "title": "Dune"})));

        assert_eq!(snapshot.document_count(), 1);
        assert_eq!(snapshot.models.len(), 2);
        let found = snapshot.get_document("Book", "b1").unwrap();
        assert_eq!(found.get("title"), Some(&json!("Dune")));
    }

    #[test]
    fn json_roundtrip() {
        let mut snapshot = StoreSnapshot::new();
        snapshot.add_document("Book", doc(json!({"_id": "b1", "tags": ["a", "b"]})));

        let json = snapshot.to_json().unwrap();
        let restored = StoreSnapshot::from_json(&json).unwrap();
        assert_eq!(snapshot, restored);
    }

    #[test]
    fn deterministic_serialization() {
        let mut first = StoreSnapshot::new();
        let mut second = StoreSnapshot::new();

        first.add_document("Book", doc(json!({"_id": "b"})));
        first.add_document("Book", doc(json!({"_id": "a"})));
        second.add_document("Book", doc(json!({"_id": "a"})));
        second.add_document("Book", doc(json!({"_id": "b"})));

        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    }

    #[test]
    fn rejects_future_format() {
        let json = r#"{"formatVersion": 99, "models": {}}"#;
        assert!(matches!(
            StoreSnapshot::from_json(json),
            Err(Error::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn rejects_misfiled_documents() {
        let json = r#"{"formatVersion": 1, "models": {"Book": {"b1": {"_id": "b2"}}}}"#;
        assert!(StoreSnapshot::from_json(json).is_err());

        let json = r#"{"formatVersion": 1, "models": {"Book": {"b1": {"title": "x"}}}}"#;
        assert!(StoreSnapshot::from_json(json).is_err());
    }
}
