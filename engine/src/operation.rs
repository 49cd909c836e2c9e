//! Messages that mutate the live cache.
//!
//! Local writes come from the application; authoritative updates come from
//! the transport, in delivery order. Both are plain data so they can be
//! queued, logged and replayed.

use crate::{diff::Diff, document::ID_FIELD, DocId, ModelName};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A mutation requested by the local application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LocalWrite {
    /// Add a new document (must carry an `_id`)
    Insert { model: ModelName, doc: Value },
    /// Apply a diff to an existing document
    Update {
        model: ModelName,
        id: DocId,
        diff: Diff,
    },
    /// Remove a document
    Remove { model: ModelName, id: DocId },
}

impl LocalWrite {
    pub fn insert(model: impl Into<ModelName>, doc: Value) -> Self {
        LocalWrite::Insert {
            model: model.into(),
            doc,
        }
    }

    pub fn update(model: impl Into<ModelName>, id: impl Into<DocId>, diff: Diff) -> Self {
        LocalWrite::Update {
            model: model.into(),
            id: id.into(),
            diff,
        }
    }

    pub fn remove(model: impl Into<ModelName>, id: impl Into<DocId>) -> Self {
        LocalWrite::Remove {
            model: model.into(),
            id: id.into(),
        }
    }

    pub fn model(&self) -> &str {
        match self {
            LocalWrite::Insert { model, .. }
            | LocalWrite::Update { model, .. }
            | LocalWrite::Remove { model, .. } => model,
        }
    }

    /// Target document id. Empty for an insert without a string `_id`.
    pub fn id(&self) -> &str {
        match self {
            LocalWrite::Insert { doc, .. } => {
                doc.get(ID_FIELD).and_then(Value::as_str).unwrap_or_default()
            }
            LocalWrite::Update { id, .. } | LocalWrite::Remove { id, .. } => id,
        }
    }
}

/// An update delivered by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AuthoritativeUpdate {
    /// The server's full version of a document
    Added {
        model: ModelName,
        id: DocId,
        doc: Value,
    },
    /// A diff against the server's previous version
    Changed {
        model: ModelName,
        id: DocId,
        diff: Diff,
    },
    /// The document no longer exists on the server
    Removed { model: ModelName, id: DocId },
}

impl AuthoritativeUpdate {
    /// An `Added` update. The id is taken from `doc`, which gets one if missing.
    pub fn added(model: impl Into<ModelName>, id: impl Into<DocId>, mut doc: Value) -> Self {
        let id = id.into();
        if let Value::Object(fields) = &mut doc {
            fields
                .entry(ID_FIELD)
                .or_insert_with(|| Value::String(id.clone()));
        }
        AuthoritativeUpdate::Added {
            model: model.into(),
            id,
            doc,
        }
    }

    pub fn changed(model: impl Into<ModelName>, id: impl Into<DocId>, diff: Diff) -> Self {
        AuthoritativeUpdate::Changed {
            model: model.into(),
            id: id.into(),
            diff,
        }
    }

    pub fn removed(model: impl Into<ModelName>, id: impl Into<DocId>) -> Self {
        AuthoritativeUpdate::Removed {
            model: model.into(),
            id: id.into(),
        }
    }

    pub fn model(&self) -> &str {
        match self {
            AuthoritativeUpdate::Added { model, .. }
            | AuthoritativeUpdate::Changed { model, .. }
            | AuthoritativeUpdate::Removed { model, .. } => model,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            AuthoritativeUpdate::Added { id, .. }
            | AuthoritativeUpdate::Changed { id, .. }
            | AuthoritativeUpdate::Removed { id, .. } => id,
        }
    }
}
