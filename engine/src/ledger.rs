//! Pre-speculation state of every document touched during a speculation
//! window.
//!
//! Entries are keyed by (model, document id). A document created inside the
//! window is [`LedgerEntry::New`]; anything else gets a [`FieldSnapshot`] of
//! the top-level fields it had before the first speculative write touched
//! them. Capture is first-write-wins: later writes never overwrite a
//! captured value.
//!
//! Authoritative updates that arrive mid-window go into a separate overlay
//! ([`FieldSnapshot::confirmed`]). At revert the overlay wins over the
//! capture, so the document ends up in the server's state rather than the
//! pre-window one.

use crate::{
    diff::{self, Diff, Operand, PartialOp},
    document::ID_FIELD,
    operation::AuthoritativeUpdate,
    DocId, ModelName,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{btree_map::Entry, BTreeMap, BTreeSet};

/// Ledger state of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum LedgerEntry {
    /// Created inside the window; revert deletes it
    New,
    /// Existed before the window; revert restores these fields
    Snapshot(FieldSnapshot),
}

/// Top-level field values to restore at revert.
///
/// A `null` value means the field was absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSnapshot {
    captured: BTreeMap<String, Value>,
    confirmed: BTreeMap<String, Value>,
    removed_locally: bool,
    removed_by_server: bool,
}

impl FieldSnapshot {
    /// Values from before the first speculative write.
    pub fn captured(&self) -> &BTreeMap<String, Value> {
        &self.captured
    }

    /// Authoritative values absorbed while speculating.
    pub fn confirmed(&self) -> &BTreeMap<String, Value> {
        &self.confirmed
    }

    /// The document was removed locally inside the window.
    pub fn is_removed_locally(&self) -> bool {
        self.removed_locally
    }

    /// The server removed the document while the window was open.
    pub fn is_removed_by_server(&self) -> bool {
        self.removed_by_server
    }

    /// Whether a speculative value for `key` is live and must survive until
    /// revert.
    pub fn claims(&self, key: &str) -> bool {
        self.removed_locally || self.captured.contains_key(key) || self.confirmed.contains_key(key)
    }

    /// Field values the document is reverted to: confirmed over captured.
    pub fn restore_target(&self) -> BTreeMap<String, Value> {
        let mut target = self.captured.clone();
        target.extend(
            self.confirmed
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        target
    }

    fn capture(&mut self, key: &str, value: Option<&Value>) -> bool {
        if key == ID_FIELD || self.captured.contains_key(key) {
            return false;
        }
        self.captured
            .insert(key.to_owned(), value.cloned().unwrap_or(Value::Null));
        true
    }

    /// The server's current value for `key` as far as the ledger knows.
    fn base(&self, key: &str) -> Value {
        self.confirmed
            .get(key)
            .or_else(|| self.captured.get(key))
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Snapshot for a speculatively created document the server has now
    /// confirmed: revert turns it into exactly the server's version.
    fn confirming(live: Option<&Value>, doc: &Value) -> Self {
        let mut snapshot = Self::default();
        match live {
            Some(live) => {
                for (key, _) in object_entries(live) {
                    snapshot.capture(key, None);
                }
            }
            None => snapshot.removed_locally = true,
        }
        for (key, value) in object_entries(doc) {
            if key != ID_FIELD {
                snapshot.confirmed.insert(key.clone(), value.clone());
            }
        }
        snapshot
    }

    /// Split a full server document: claimed keys go to the overlay, the
    /// rest become ops against the live document.
    fn absorb_document(&mut self, live: Option<&Value>, doc: &Value, immediate: &mut Vec<PartialOp>) {
        self.removed_by_server = false;
        let null = Value::Null;
        let current = live.unwrap_or(&null);

        let keys: BTreeSet<String> = object_entries(current)
            .chain(object_entries(doc))
            .map(|(key, _)| key.clone())
            .filter(|key| key != ID_FIELD)
            .collect();

        for key in keys {
            let incoming = doc.get(&key).cloned().unwrap_or(Value::Null);
            if self.claims(&key) {
                self.confirmed.insert(key, incoming);
                continue;
            }
            let now = current.get(&key).unwrap_or(&null);
            if let Some(change) = diff::diff_values(now, &incoming) {
                immediate.push(PartialOp::at(vec![key], Operand::Nested(change)));
            }
        }
    }

    /// Fold one server op on a claimed key into the overlay.
    fn absorb_op(&mut self, op: PartialOp) {
        let Some(key) = op.path.first().cloned() else {
            return;
        };
        let mut scratch = Value::Object(Map::from_iter([(key.clone(), self.base(&key))]));
        diff::apply_lenient(&mut scratch, &Diff::Partial(vec![op]));
        let value = scratch.get(&key).cloned().unwrap_or(Value::Null);
        self.confirmed.insert(key, value);
    }
}

/// Ledger of every document touched while round trips are outstanding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationLedger {
    models: BTreeMap<ModelName, BTreeMap<DocId, LedgerEntry>>,
}

impl SimulationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a local write before it lands.
    ///
    /// `diff` is `None` for an insert, in which case `before` is the new
    /// document. Otherwise the fields `diff` touches are captured from
    /// `before` unless already captured.
    pub fn record_local_write(
        &mut self,
        model: &str,
        id: &str,
        before: &Value,
        diff: Option<&Diff>,
    ) {
        let entries = self.models.entry(model.to_owned()).or_default();

        let Some(diff) = diff else {
            match entries.entry(id.to_owned()) {
                Entry::Vacant(slot) => {
                    tracing::debug!(model, id, "document created while speculating");
                    slot.insert(LedgerEntry::New);
                }
                Entry::Occupied(mut slot) => {
                    // re-created after a removal: the fields it brings were absent before
                    if let LedgerEntry::Snapshot(snapshot) = slot.get_mut() {
                        for (key, _) in object_entries(before) {
                            snapshot.capture(key, None);
                        }
                    }
                }
            }
            return;
        };

        let entry = entries
            .entry(id.to_owned())
            .or_insert_with(|| LedgerEntry::Snapshot(FieldSnapshot::default()));
        if let LedgerEntry::Snapshot(snapshot) = entry {
            for key in diff::extract_changed_keys(before, diff) {
                snapshot.capture(&key, before.get(&key));
            }
        }
    }

    /// Record a local removal. `before` is the document being removed.
    pub fn record_local_removal(&mut self, model: &str, id: &str, before: &Value) {
        let entries = self.models.entry(model.to_owned()).or_default();

        if matches!(entries.get(id), Some(LedgerEntry::New)) {
            tracing::debug!(model, id, "document created and removed in the same window");
            entries.remove(id);
            if entries.is_empty() {
                self.models.remove(model);
            }
            return;
        }

        let entry = entries
            .entry(id.to_owned())
            .or_insert_with(|| LedgerEntry::Snapshot(FieldSnapshot::default()));
        if let LedgerEntry::Snapshot(snapshot) = entry {
            for (key, value) in object_entries(before) {
                snapshot.capture(key, Some(value));
            }
            snapshot.removed_locally = true;
        }
    }

    /// Split an authoritative update against the ledger.
    ///
    /// Returns the part to apply to the live document now, or `None` if the
    /// whole update was absorbed. Keys with a speculative claim are folded
    /// into the overlay; the capture itself is never touched.
    pub fn merge_authoritative(
        &mut self,
        update: &AuthoritativeUpdate,
        live: Option<&Value>,
    ) -> Option<AuthoritativeUpdate> {
        let (model, id) = (update.model(), update.id());
        let Some(entry) = self.models.get_mut(model).and_then(|e| e.get_mut(id)) else {
            return Some(update.clone());
        };

        if matches!(entry, LedgerEntry::New) {
            if let AuthoritativeUpdate::Added { doc, .. } = update {
                tracing::debug!(model, id, "server confirmed speculatively created document");
                *entry = LedgerEntry::Snapshot(FieldSnapshot::confirming(live, doc));
            } else {
                tracing::debug!(model, id, "absorbed update for speculatively created document");
            }
            return None;
        }

        let LedgerEntry::Snapshot(snapshot) = entry else {
            return None;
        };

        let mut immediate = Vec::new();
        match update {
            AuthoritativeUpdate::Removed { .. } => {
                tracing::debug!(model, id, "server removed speculated document");
                snapshot.removed_by_server = true;
            }
            AuthoritativeUpdate::Added { doc, .. } => {
                snapshot.absorb_document(live, doc, &mut immediate);
            }
            AuthoritativeUpdate::Changed { diff, .. } => {
                for op in diff::flatten(diff) {
                    let claimed = op.path.first().map(|key| snapshot.claims(key));
                    match claimed {
                        None => match &op.operand {
                            Operand::Scalar(doc @ Value::Object(_)) => {
                                snapshot.absorb_document(live, doc, &mut immediate)
                            }
                            other => tracing::debug!(model, id, operand = ?other, "skipping root-level op"),
                        },
                        Some(_) if op.path[0] == ID_FIELD => {}
                        Some(true) => snapshot.absorb_op(op),
                        Some(false) => immediate.push(op),
                    }
                }
            }
        }

        if immediate.is_empty() {
            None
        } else {
            Some(AuthoritativeUpdate::Changed {
                model: model.to_owned(),
                id: id.to_owned(),
                diff: Diff::Partial(immediate),
            })
        }
    }

    pub fn get(&self, model: &str, id: &str) -> Option<&LedgerEntry> {
        self.models.get(model)?.get(id)
    }

    /// All entries in (model, id) order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &LedgerEntry)> {
        self.models.iter().flat_map(|(model, entries)| {
            entries
                .iter()
                .map(move |(id, entry)| (model.as_str(), id.as_str(), entry))
        })
    }

    pub fn len(&self) -> usize {
        self.models.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.models.values().all(BTreeMap::is_empty)
    }

    /// Drop every entry of every model.
    pub fn clear(&mut self) {
        self.models.clear();
    }
}

fn object_entries(value: &Value) -> impl Iterator<Item = (&String, &Value)> {
    value.as_object().into_iter().flatten()
}
