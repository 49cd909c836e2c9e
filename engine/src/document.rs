//! Documents held in the live cache, and provenance flags for change events.

use crate::{
    diff::{self, Diff},
    error::Result,
    DocId, Error,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Field holding a document's identity.
pub const ID_FIELD: &str = "_id";

/// Where a change came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Flag {
    /// Applied from an authoritative update
    ServerUpdate,
    /// Emitted while reverting speculative writes
    SimComplete,
    /// Application-defined marker
    Custom(String),
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flag::ServerUpdate => f.write_str("serverUpdate"),
            Flag::SimComplete => f.write_str("simComplete"),
            Flag::Custom(name) => f.write_str(name),
        }
    }
}

/// A JSON object with a string `_id`.
///
/// The identity never changes once the document exists: diffs that would
/// alter or drop `_id` are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Document(Value);

impl Document {
    /// An empty document with the given id.
    pub fn new(id: impl Into<DocId>) -> Self {
        let mut fields = Map::new();
        fields.insert(ID_FIELD.to_owned(), Value::String(id.into()));
        Document(Value::Object(fields))
    }

    /// Validate and wrap a JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        match value.get(ID_FIELD) {
            Some(Value::String(_)) if value.is_object() => Ok(Document(value)),
            Some(_) => Err(Error::InvalidDocument(format!(
                "`{ID_FIELD}` must be a string"
            ))),
            None if value.is_object() => Err(Error::InvalidDocument(format!(
                "missing `{ID_FIELD}`"
            ))),
            None => Err(Error::InvalidDocument(format!(
                "expected an object, got {}",
                diff::kind_name(&value)
            ))),
        }
    }

    pub fn id(&self) -> &str {
        self.0
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Value of a top-level field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// All top-level fields, `_id` included.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.as_object().into_iter().flatten()
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Apply a diff, returning its undo. The document is unchanged on error.
    pub fn apply(&mut self, diff: &Diff) -> Result<Diff> {
        let mut next = self.0.clone();
        let undo = diff::apply_with_undo(&mut next, diff)?;
        if !next.is_object() {
            return Err(Error::InvalidDocument(format!(
                "diff turns document `{}` into {}",
                self.id(),
                diff::kind_name(&next)
            )));
        }
        if next.get(ID_FIELD) != self.0.get(ID_FIELD) {
            return Err(Error::InvalidDocument(format!(
                "diff changes `{ID_FIELD}` of document `{}`",
                self.id()
            )));
        }
        self.0 = next;
        Ok(undo)
    }

    /// Overwrite one top-level field without going through a diff.
    /// `null` removes the field.
    pub(crate) fn set_field(&mut self, field: &str, value: Value) {
        if field == ID_FIELD {
            return;
        }
        if let Value::Object(fields) = &mut self.0 {
            if value.is_null() {
                fields.remove(field);
            } else {
                fields.insert(field.to_owned(), value);
            }
        }
    }
}

impl TryFrom<Value> for Document {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Document::from_value(value)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        doc.0
    }
}
