//! Speculation state machine and revert.
//!
//! The [`Reconciler`] is [`Phase::Quiescent`] while no round trip is
//! outstanding and [`Phase::Speculating`] otherwise. Only while speculating
//! do local writes reach the [`SimulationLedger`].
//!
//! # Revert
//!
//! When the last outstanding round trip settles, every ledger entry is
//! replayed against the live cache:
//!
//! 1. Documents created in the window (and documents the server removed)
//!    are deleted
//! 2. Snapshotted documents get their captured fields back, with values the
//!    server confirmed in the meantime taking precedence
//! 3. Locally removed documents that still exist on the server are recreated
//!
//! Then the ledger is cleared. Revert never fails: entries that cannot be
//! applied cleanly are repaired field by field and logged.

use crate::{
    diff::{self, Diff},
    document::Flag,
    ledger::{FieldSnapshot, LedgerEntry, SimulationLedger},
    operation::AuthoritativeUpdate,
    DocChange, DocId, Document, ModelName, Store,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::mem;

/// Whether speculative writes are being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    /// No round trip outstanding; writes land directly (default)
    #[default]
    Quiescent,
    /// At least one round trip outstanding; writes are recorded first
    Speculating,
}

/// What a revert did, by (model, id).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevertReport {
    /// Documents removed from the live cache
    pub deleted: Vec<(ModelName, DocId)>,
    /// Documents whose fields were restored
    pub changed: Vec<(ModelName, DocId)>,
    /// Locally removed documents that were recreated
    pub restored: Vec<(ModelName, DocId)>,
}

impl RevertReport {
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.changed.is_empty() && self.restored.is_empty()
    }

    fn record(&mut self, model: &str, change: &DocChange) {
        let key = (model.to_owned(), change.id().to_owned());
        match change.kind() {
            crate::ChangeKind::Delete => self.deleted.push(key),
            crate::ChangeKind::Change => self.changed.push(key),
            crate::ChangeKind::Add => self.restored.push(key),
        }
    }
}

/// Tracks speculative writes and rolls them back.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    phase: Phase,
    ledger: SimulationLedger,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_speculating(&self) -> bool {
        self.phase == Phase::Speculating
    }

    pub fn ledger(&self) -> &SimulationLedger {
        &self.ledger
    }

    /// The outstanding count left zero.
    pub fn on_round_trip_started(&mut self) {
        if self.phase == Phase::Quiescent {
            tracing::debug!("speculation window opened");
        }
        self.phase = Phase::Speculating;
    }

    /// See [`SimulationLedger::record_local_write`]. No-op when quiescent.
    pub fn record_local_write(&mut self, model: &str, id: &str, before: &Value, diff: Option<&Diff>) {
        if self.is_speculating() {
            self.ledger.record_local_write(model, id, before, diff);
        }
    }

    /// See [`SimulationLedger::record_local_removal`]. No-op when quiescent.
    pub fn record_local_removal(&mut self, model: &str, id: &str, before: &Value) {
        if self.is_speculating() {
            self.ledger.record_local_removal(model, id, before);
        }
    }

    /// The part of `update` to apply now. Everything passes through when
    /// quiescent.
    pub fn merge_authoritative(
        &mut self,
        update: &AuthoritativeUpdate,
        live: Option<&Value>,
    ) -> Option<AuthoritativeUpdate> {
        if self.is_speculating() {
            self.ledger.merge_authoritative(update, live)
        } else {
            Some(update.clone())
        }
    }

    /// Roll every ledger entry back onto `store`, clear the ledger and
    /// return to [`Phase::Quiescent`].
    ///
    /// Events are returned rather than delivered so observers run after the
    /// revert batch is complete. With an empty ledger this does nothing.
    pub fn revert(&mut self, store: &mut Store) -> (RevertReport, Vec<(ModelName, DocChange)>) {
        let mut report = RevertReport::default();
        let mut events = Vec::new();

        for (model, id, entry) in self.ledger.iter() {
            let change = match entry {
                LedgerEntry::New => delete(store, model, id),
                LedgerEntry::Snapshot(snapshot) if snapshot.is_removed_by_server() => {
                    delete(store, model, id)
                }
                LedgerEntry::Snapshot(snapshot) => restore(store, model, id, snapshot),
            };
            if let Some(change) = change {
                report.record(model, &change);
                events.push((model.to_owned(), change));
            }
        }

        self.ledger.clear();
        self.phase = Phase::Quiescent;

        if !report.is_empty() {
            tracing::info!(
                deleted = report.deleted.len(),
                changed = report.changed.len(),
                restored = report.restored.len(),
                "reverted speculative writes"
            );
        }
        (report, events)
    }
}

fn delete(store: &mut Store, model: &str, id: &str) -> Option<DocChange> {
    let doc = store.take(model, id)?;
    Some(DocChange::delete(doc.into_value(), Some(Flag::SimComplete)))
}

fn restore(store: &mut Store, model: &str, id: &str, snapshot: &FieldSnapshot) -> Option<DocChange> {
    let target = snapshot.restore_target();

    if !store.contains(model, id) {
        if !snapshot.is_removed_locally() {
            tracing::warn!(model, id, "speculated document is gone; nothing to restore");
            return None;
        }
        let mut doc = Document::new(id);
        for (key, value) in target {
            doc.set_field(&key, value);
        }
        if let Err(err) = store.put(model, doc.clone()) {
            tracing::warn!(model, id, error = %err, "could not recreate document");
            return None;
        }
        return Some(DocChange::add(doc.into_value(), Some(Flag::SimComplete)));
    }

    let doc = store.get_mut(model, id)?;
    let null = Value::Null;
    let mut fields = Vec::new();
    for (key, value) in target {
        let live = doc.get(&key).unwrap_or(&null);
        if live == &value {
            continue;
        }
        if !live.is_null() && !value.is_null() && mem::discriminant(live) != mem::discriminant(&value) {
            tracing::warn!(model, id, field = %key, "snapshot shape differs from live value; replacing field");
        }
        fields.push((key, value));
    }
    if fields.is_empty() {
        return None;
    }

    let before = doc.as_value().clone();
    for (key, value) in fields {
        doc.set_field(&key, value);
    }
    let undo = diff::diff_values(doc.as_value(), &before)?;
    Some(DocChange::change(
        doc.as_value().clone(),
        undo,
        Some(Flag::SimComplete),
    ))
}
