//! Store - the live document cache.
//!
//! The Store holds the current (possibly speculative) version of every
//! document, grouped by model. It knows nothing about speculation: the
//! [`ReconciliationContext`](crate::ReconciliationContext) routes every
//! mutation through the ledger before it lands here.

use crate::{
    diff::Diff, error::Result, snapshot::StoreSnapshot, DocId, Document, Error, ModelName,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The documents of one model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    docs: HashMap<DocId, Document>,
}

impl Collection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self {
            docs: HashMap::new(),
        }
    }

    /// Get a document by ID.
    pub fn get(&self, id: &str) -> Option<&Document> {
        self.docs.get(id)
    }

    /// Get a mutable document by ID.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Document> {
        self.docs.get_mut(id)
    }

    /// Insert or replace a document, returning the previous one.
    pub fn insert(&mut self, doc: Document) -> Option<Document> {
        self.docs.insert(doc.id().to_owned(), doc)
    }

    /// Remove a document.
    pub fn remove(&mut self, id: &str) -> Option<Document> {
        self.docs.remove(id)
    }

    /// Check if a document exists.
    pub fn contains(&self, id: &str) -> bool {
        self.docs.contains_key(id)
    }

    /// All documents, in no particular order.
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.docs.values()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

/// The live cache of every registered model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Store {
    collections: HashMap<ModelName, Collection>,
}

impl Store {
    /// Create an empty store with no models.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model. Registering twice keeps the existing documents.
    pub fn register_model(&mut self, model: impl Into<ModelName>) {
        self.collections.entry(model.into()).or_default();
    }

    pub fn has_model(&self, model: &str) -> bool {
        self.collections.contains_key(model)
    }

    /// Registered model names, sorted.
    pub fn models(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.collections.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Get a collection by name.
    pub fn collection(&self, model: &str) -> Option<&Collection> {
        self.collections.get(model)
    }

    fn collection_mut(&mut self, model: &str) -> Result<&mut Collection> {
        self.collections
            .get_mut(model)
            .ok_or_else(|| Error::ModelNotFound(model.to_owned()))
    }

    /// Get a document by model and ID.
    pub fn get(&self, model: &str, id: &str) -> Option<&Document> {
        self.collections.get(model)?.get(id)
    }

    pub(crate) fn get_mut(&mut self, model: &str, id: &str) -> Option<&mut Document> {
        self.collections.get_mut(model)?.get_mut(id)
    }

    pub fn contains(&self, model: &str, id: &str) -> bool {
        self.get(model, id).is_some()
    }

    /// Query documents of a model.
    pub fn query(&self, model: &str) -> Option<QueryBuilder<'_>> {
        self.collections.get(model).map(QueryBuilder::new)
    }

    /// Add a document that must not exist yet.
    pub fn insert(&mut self, model: &str, doc: Document) -> Result<()> {
        let collection = self.collection_mut(model)?;
        if collection.contains(doc.id()) {
            return Err(Error::DocumentAlreadyExists(doc.id().to_owned()));
        }
        collection.insert(doc);
        Ok(())
    }

    /// Apply a diff to an existing document, returning the undo.
    pub fn update(&mut self, model: &str, id: &str, diff: &Diff) -> Result<Diff> {
        self.collection_mut(model)?
            .get_mut(id)
            .ok_or_else(|| Error::DocumentNotFound(id.to_owned()))?
            .apply(diff)
    }

    /// Remove an existing document.
    pub fn remove(&mut self, model: &str, id: &str) -> Result<Document> {
        self.collection_mut(model)?
            .remove(id)
            .ok_or_else(|| Error::DocumentNotFound(id.to_owned()))
    }

    /// Insert or replace a document, returning the one it replaced.
    pub fn put(&mut self, model: &str, doc: Document) -> Result<Option<Document>> {
        Ok(self.collection_mut(model)?.insert(doc))
    }

    /// Remove a document if present.
    pub fn take(&mut self, model: &str, id: &str) -> Option<Document> {
        self.collections.get_mut(model)?.remove(id)
    }

    /// Total number of documents across all models.
    pub fn document_count(&self) -> usize {
        self.collections.values().map(Collection::len).sum()
    }

    /// Export the live cache as a snapshot.
    pub fn export_state(&self) -> StoreSnapshot {
        let mut snapshot = StoreSnapshot::new();
        for (model, collection) in &self.collections {
            snapshot.add_model(model.clone());
            for doc in collection.documents() {
                snapshot.add_document(model.clone(), doc.clone());
            }
        }
        snapshot
    }

    /// Replace the live cache with a snapshot's contents.
    ///
    /// Models in the snapshot are registered if needed; registered models
    /// missing from it end up empty.
    pub fn import_state(&mut self, snapshot: StoreSnapshot) -> Result<()> {
        snapshot.validate()?;

        for collection in self.collections.values_mut() {
            collection.docs.clear();
        }
        for (model, docs) in snapshot.models {
            let collection = self.collections.entry(model).or_default();
            for (_, doc) in docs {
                collection.insert(doc);
            }
        }
        Ok(())
    }
}

/// Builder for querying documents of one model.
///
/// Results are sorted by document id so they are stable across runs.
#[derive(Debug)]
pub struct QueryBuilder<'a> {
    collection: &'a Collection,
}

impl<'a> QueryBuilder<'a> {
    fn new(collection: &'a Collection) -> Self {
        Self { collection }
    }

    fn sorted(&self) -> Vec<&'a Document> {
        let mut docs: Vec<&'a Document> = self.collection.documents().collect();
        docs.sort_unstable_by(|a, b| a.id().cmp(b.id()));
        docs
    }

    /// Get all documents.
    pub fn all(self) -> Vec<&'a Document> {
        self.sorted()
    }

    /// Get the document with the lowest id.
    pub fn first(self) -> Option<&'a Document> {
        self.collection.documents().min_by(|a, b| a.id().cmp(b.id()))
    }

    /// Count documents.
    pub fn count(self) -> usize {
        self.collection.len()
    }

    /// Filter documents by a predicate on their JSON value.
    pub fn filter<F>(self, predicate: F) -> Vec<&'a Document>
    where
        F: Fn(&serde_json::Value) -> bool,
    {
        self.sorted()
            .into_iter()
            .filter(|doc| predicate(doc.as_value()))
            .collect()
    }
}
