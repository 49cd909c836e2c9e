//! The single entry point for one client session.
//!
//! A [`ReconciliationContext`] owns the live cache, the reconciler and its
//! ledger, the round-trip counter and the observers. Every local write and
//! every authoritative update goes through it, so nothing else needs to
//! know whether the session is currently speculating.
//!
//! Each entry point applies its mutation, then delivers the resulting
//! events to observers. Writes the observers queue are applied afterwards
//! as ordinary local writes, round after round, up to
//! [`Config::followup_limit`] rounds.

use crate::{
    diff::{self, Diff},
    document::{Document, Flag, ID_FIELD},
    error::Result,
    observer::{Followups, ObserverId, Observers},
    operation::{AuthoritativeUpdate, LocalWrite},
    reconcile::{Phase, Reconciler, RevertReport},
    tracker::{RoundTrips, Transition},
    Config, DocChange, Error, ModelName, SimulationLedger, Store, StoreSnapshot,
};
use serde_json::{Map, Value};

type Event = (ModelName, DocChange);

/// Reconciliation state for one session.
#[derive(Debug, Default)]
pub struct ReconciliationContext {
    config: Config,
    store: Store,
    reconciler: Reconciler,
    round_trips: RoundTrips,
    observers: Observers,
}

impl ReconciliationContext {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The live cache.
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn ledger(&self) -> &SimulationLedger {
        self.reconciler.ledger()
    }

    pub fn phase(&self) -> Phase {
        self.reconciler.phase()
    }

    pub fn round_trips(&self) -> &RoundTrips {
        &self.round_trips
    }

    pub fn register_model(&mut self, model: impl Into<ModelName>) {
        self.store.register_model(model);
    }

    /// Replace the live cache with a persisted snapshot. Observers are not
    /// notified. Refused while round trips are outstanding, because the
    /// ledger describes the cache being replaced.
    pub fn load_snapshot(&mut self, snapshot: StoreSnapshot) -> Result<()> {
        if !self.round_trips.is_idle() {
            return Err(Error::InvalidSnapshot(format!(
                "cannot load while {} round trips are outstanding",
                self.round_trips.outstanding()
            )));
        }
        let documents = snapshot.document_count();
        self.store.import_state(snapshot)?;
        tracing::info!(documents, "loaded snapshot");
        Ok(())
    }

    /// Observe changes to every model.
    pub fn observe<F>(&mut self, callback: F) -> ObserverId
    where
        F: FnMut(&str, &DocChange, &mut Followups) + 'static,
    {
        self.observers.observe(callback)
    }

    /// Observe changes to one model.
    pub fn observe_model<F>(&mut self, model: impl Into<ModelName>, callback: F) -> ObserverId
    where
        F: FnMut(&str, &DocChange, &mut Followups) + 'static,
    {
        self.observers.observe_model(model, callback)
    }

    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        self.observers.unobserve(id)
    }

    /// A round trip went out. The first one opens a speculation window.
    pub fn begin_round_trip(&mut self) {
        if self.round_trips.increment() == Transition::Started {
            self.reconciler.on_round_trip_started();
        }
    }

    /// A round trip came back. The last one reverts the speculation window
    /// and reports what changed; otherwise the report is empty.
    pub fn end_round_trip(&mut self) -> Result<RevertReport> {
        match self.round_trips.decrement()? {
            Transition::Settled => {
                let (report, events) = self.reconciler.revert(&mut self.store);
                self.dispatch(events)?;
                Ok(report)
            }
            Transition::Started | Transition::Unchanged => Ok(RevertReport::default()),
        }
    }

    /// Add a document. It must have a string `_id` not yet in use.
    pub fn insert(&mut self, model: &str, doc: Value) -> Result<DocChange> {
        let (_, change) = self
            .apply_local(LocalWrite::insert(model, doc))?
            .ok_or_else(|| Error::InvalidDocument("insert produced no change".into()))?;
        Ok(change)
    }

    /// Apply a diff to a document. `None` if nothing changed.
    pub fn update(&mut self, model: &str, id: &str, diff: Diff) -> Result<Option<DocChange>> {
        Ok(self
            .apply_local(LocalWrite::update(model, id, diff))?
            .map(|(_, change)| change))
    }

    /// Remove a document.
    pub fn remove(&mut self, model: &str, id: &str) -> Result<DocChange> {
        let (_, change) = self
            .apply_local(LocalWrite::remove(model, id))?
            .ok_or_else(|| Error::DocumentNotFound(id.to_owned()))?;
        Ok(change)
    }

    /// Apply a local write and notify observers.
    pub fn apply_local(&mut self, write: LocalWrite) -> Result<Option<(ModelName, DocChange)>> {
        let event = self.perform_local(write)?;
        if let Some(event) = &event {
            self.dispatch(vec![event.clone()])?;
        }
        Ok(event)
    }

    /// Apply an authoritative update and notify observers.
    ///
    /// While speculating, the part of the update that competes with a
    /// speculative write is held back until revert. `None` if nothing
    /// changed in the live cache.
    pub fn apply_authoritative(
        &mut self,
        update: AuthoritativeUpdate,
    ) -> Result<Option<(ModelName, DocChange)>> {
        let event = self.perform_authoritative(update)?;
        if let Some(event) = &event {
            self.dispatch(vec![event.clone()])?;
        }
        Ok(event)
    }

    fn perform_local(&mut self, write: LocalWrite) -> Result<Option<Event>> {
        match write {
            LocalWrite::Insert { model, doc } => {
                let doc = Document::from_value(doc)?;
                let id = doc.id().to_owned();
                self.store.insert(&model, doc.clone())?;
                self.reconciler
                    .record_local_write(&model, &id, doc.as_value(), None);
                Ok(Some((model, DocChange::add(doc.into_value(), None))))
            }
            LocalWrite::Update { model, id, diff } => {
                if !self.store.has_model(&model) {
                    return Err(Error::ModelNotFound(model));
                }
                let before = self
                    .store
                    .get(&model, &id)
                    .ok_or_else(|| Error::DocumentNotFound(id.clone()))?
                    .as_value()
                    .clone();
                let undo = self.store.update(&model, &id, &diff)?;
                if undo.is_empty() {
                    return Ok(None);
                }
                self.reconciler
                    .record_local_write(&model, &id, &before, Some(&diff));
                let after = self.live_value(&model, &id);
                Ok(Some((model, DocChange::change(after, undo, None))))
            }
            LocalWrite::Remove { model, id } => {
                let doc = self.store.remove(&model, &id)?;
                self.reconciler
                    .record_local_removal(&model, &id, doc.as_value());
                Ok(Some((model, DocChange::delete(doc.into_value(), None))))
            }
        }
    }

    fn perform_authoritative(&mut self, update: AuthoritativeUpdate) -> Result<Option<Event>> {
        let live = self
            .store
            .get(update.model(), update.id())
            .map(Document::as_value);
        let Some(effective) = self.reconciler.merge_authoritative(&update, live) else {
            return Ok(None);
        };

        let flag = Some(Flag::ServerUpdate);
        match effective {
            AuthoritativeUpdate::Added { model, id, doc } => {
                let doc = Document::from_value(with_id(doc, &id))?;
                match self.store.get_mut(&model, &id) {
                    Some(existing) => {
                        let Some(diff) = diff::diff_values(existing.as_value(), doc.as_value())
                        else {
                            return Ok(None);
                        };
                        let undo = existing.apply(&diff)?;
                        let after = existing.as_value().clone();
                        Ok(Some((model, DocChange::change(after, undo, flag))))
                    }
                    None => {
                        self.store.put(&model, doc.clone())?;
                        Ok(Some((model, DocChange::add(doc.into_value(), flag))))
                    }
                }
            }
            AuthoritativeUpdate::Changed { model, id, diff } => {
                if self.store.contains(&model, &id) {
                    let undo = self.store.update(&model, &id, &diff)?;
                    if undo.is_empty() {
                        return Ok(None);
                    }
                    let after = self.live_value(&model, &id);
                    return Ok(Some((model, DocChange::change(after, undo, flag))));
                }
                tracing::debug!(model = %model, id = %id, "change for unknown document; adding it");
                let doc = diff::apply_diff(&Document::new(id.as_str()).into_value(), &diff)?;
                let doc = Document::from_value(with_id(doc, &id))?;
                self.store.put(&model, doc.clone())?;
                Ok(Some((model, DocChange::add(doc.into_value(), flag))))
            }
            AuthoritativeUpdate::Removed { model, id } => match self.store.take(&model, &id) {
                Some(doc) => Ok(Some((model, DocChange::delete(doc.into_value(), flag)))),
                None => {
                    tracing::debug!(model = %model, id = %id, "removal of unknown document ignored");
                    Ok(None)
                }
            },
        }
    }

    fn live_value(&self, model: &str, id: &str) -> Value {
        self.store
            .get(model, id)
            .map(|doc| doc.as_value().clone())
            .unwrap_or(Value::Null)
    }

    /// Deliver a batch of events, then apply follow-ups until none remain.
    fn dispatch(&mut self, mut batch: Vec<Event>) -> Result<()> {
        let mut followups = Followups::new();
        let mut rounds = 0;
        loop {
            for (model, change) in &batch {
                self.observers.notify(model, change, &mut followups);
            }
            if followups.is_empty() {
                return Ok(());
            }

            rounds += 1;
            if rounds > self.config.followup_limit {
                tracing::warn!(
                    limit = self.config.followup_limit,
                    pending = followups.len(),
                    "observer follow-ups did not settle"
                );
                return Err(Error::FollowupLimitExceeded(self.config.followup_limit));
            }

            let writes: Vec<LocalWrite> = followups.drain().collect();
            batch = Vec::with_capacity(writes.len());
            for write in writes {
                if let Some(event) = self.perform_local(write)? {
                    batch.push(event);
                }
            }
        }
    }
}

/// Make sure `doc` carries `id`, the id the update was addressed to.
fn with_id(doc: Value, id: &str) -> Value {
    match doc {
        Value::Object(mut fields) => {
            fields
                .entry(ID_FIELD)
                .or_insert_with(|| Value::String(id.to_owned()));
            Value::Object(fields)
        }
        Value::Null => {
            let mut fields = Map::new();
            fields.insert(ID_FIELD.to_owned(), Value::String(id.to_owned()));
            Value::Object(fields)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChangeKind;
    use serde_json::json;
    use std::{cell::RefCell, rc::Rc};

    fn context() -> ReconciliationContext {
        let mut ctx = ReconciliationContext::new(Config::default());
        ctx.register_model("Book");
        ctx
    }

    fn live(ctx: &ReconciliationContext, id: &str) -> Option<Value> {
        ctx.store().get("Book", id).map(|d| d.as_value().clone())
    }

    fn recorder(ctx: &mut ReconciliationContext) -> Rc<RefCell<Vec<String>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        ctx.observe(move |model, change, _| log.borrow_mut().push(format!("{model}:{change}")));
        seen
    }

    #[test]
    fn quiescent_writes_land_directly() {
        let mut ctx = context();
        let change = ctx.insert("Book", json!({"_id": "b1", "pages": 1})).unwrap();
        assert_eq!(change.kind(), ChangeKind::Add);

        let change = ctx
            .update("Book", "b1", Diff::set("pages", json!(2)))
            .unwrap()
            .unwrap();
        assert_eq!(change.was(), Some(&json!({"_id": "b1", "pages": 1})));

        assert!(ctx.update("Book", "b1", Diff::set("pages", json!(2))).unwrap().is_none());
        assert!(ctx.ledger().is_empty());
        assert_eq!(ctx.phase(), Phase::Quiescent);

        let change = ctx.remove("Book", "b1").unwrap();
        assert!(change.is_delete());
        assert!(live(&ctx, "b1").is_none());
    }

    #[test]
    fn load_snapshot_replaces_the_cache_when_idle() {
        let mut ctx = context();
        ctx.insert("Book", json!({"_id": "old"})).unwrap();
        let seen = recorder(&mut ctx);

        let snapshot = StoreSnapshot::from_json(
            r#"{"formatVersion": 1, "models": {"Book": {"b1": {"_id": "b1", "pages": 3}}}}"#,
        )
        .unwrap();
        ctx.load_snapshot(snapshot.clone()).unwrap();
        assert!(live(&ctx, "old").is_none());
        assert_eq!(live(&ctx, "b1"), Some(json!({"_id": "b1", "pages": 3})));
        assert!(seen.borrow().is_empty());

        ctx.begin_round_trip();
        assert!(matches!(
            ctx.load_snapshot(snapshot),
            Err(Error::InvalidSnapshot(_))
        ));
        assert_eq!(live(&ctx, "b1"), Some(json!({"_id": "b1", "pages": 3})));
    }

    #[test]
    fn local_errors_propagate() {
        let mut ctx = context();
        assert!(matches!(
            ctx.insert("Book", json!({"title": "no id"})),
            Err(Error::InvalidDocument(_))
        ));
        assert!(matches!(
            ctx.update("Book", "missing", Diff::set("a", json!(1))),
            Err(Error::DocumentNotFound(_))
        ));
        assert!(matches!(
            ctx.insert("Shelf", json!({"_id": "s"})),
            Err(Error::ModelNotFound(_))
        ));

        ctx.insert("Book", json!({"_id": "b1", "title": "x"})).unwrap();
        let bad = Diff::partial([crate::PartialOp::set("title.deep", json!(1))]);
        assert!(matches!(
            ctx.update("Book", "b1", bad),
            Err(Error::MalformedDiff(_))
        ));
        assert!(matches!(ctx.end_round_trip(), Err(Error::NoOutstandingRoundTrip)));
    }

    #[test]
    fn nested_round_trips_revert_once() {
        let mut ctx = context();
        ctx.insert("Book", json!({"_id": "b1", "pages": 1})).unwrap();

        ctx.begin_round_trip();
        ctx.begin_round_trip();
        assert_eq!(ctx.phase(), Phase::Speculating);
        ctx.update("Book", "b1", Diff::set("pages", json!(2))).unwrap();

        let report = ctx.end_round_trip().unwrap();
        assert!(report.is_empty());
        assert_eq!(live(&ctx, "b1").unwrap()["pages"], json!(2));

        let report = ctx.end_round_trip().unwrap();
        assert_eq!(report.changed.len(), 1);
        assert_eq!(live(&ctx, "b1").unwrap()["pages"], json!(1));
        assert_eq!(ctx.phase(), Phase::Quiescent);
        assert!(ctx.ledger().is_empty());
    }

    #[test]
    fn authoritative_updates_are_flagged() {
        let mut ctx = context();
        let seen = recorder(&mut ctx);

        ctx.apply_authoritative(AuthoritativeUpdate::added("Book", "b1", json!({"pages": 1})))
            .unwrap();
        ctx.apply_authoritative(AuthoritativeUpdate::changed(
            "Book",
            "b1",
            Diff::set("pages", json!(2)),
        ))
        .unwrap();
        ctx.apply_authoritative(AuthoritativeUpdate::removed("Book", "b1"))
            .unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|line| line.ends_with(", serverUpdate)")));
        assert!(seen[0].starts_with("Book:DocChange.add("));
        assert!(seen[2].starts_with("Book:DocChange.delete("));
    }

    #[test]
    fn change_for_unknown_document_is_an_add() {
        let mut ctx = context();
        let (_, change) = ctx
            .apply_authoritative(AuthoritativeUpdate::changed(
                "Book",
                "b9",
                Diff::set("title", json!("Emma")),
            ))
            .unwrap()
            .unwrap();
        assert!(change.is_add());
        assert_eq!(live(&ctx, "b9"), Some(json!({"_id": "b9", "title": "Emma"})));

        // removing something we never had is not an error
        assert!(ctx
            .apply_authoritative(AuthoritativeUpdate::removed("Book", "zz"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn added_over_live_document_is_a_change() {
        let mut ctx = context();
        ctx.insert("Book", json!({"_id": "b1", "pages": 1, "draft": true})).unwrap();

        let (_, change) = ctx
            .apply_authoritative(AuthoritativeUpdate::added("Book", "b1", json!({"pages": 3})))
            .unwrap()
            .unwrap();
        assert!(change.is_change());
        assert_eq!(live(&ctx, "b1"), Some(json!({"_id": "b1", "pages": 3})));

        let again = ctx
            .apply_authoritative(AuthoritativeUpdate::added("Book", "b1", json!({"pages": 3})))
            .unwrap();
        assert!(again.is_none());
    }

    #[test]
    fn observers_see_revert_after_it_completes() {
        let mut ctx = context();
        ctx.insert("Book", json!({"_id": "b1", "pages": 1})).unwrap();

        let seen = recorder(&mut ctx);
        ctx.begin_round_trip();
        ctx.insert("Book", json!({"_id": "b2"})).unwrap();
        ctx.update("Book", "b1", Diff::set("pages", json!(5))).unwrap();
        seen.borrow_mut().clear();

        ctx.end_round_trip().unwrap();
        let seen = seen.borrow();
        assert_eq!(
            *seen,
            vec![
                r#"Book:DocChange.change({"_id":"b1","pages":1}, {"partial":[{"path":["pages"],"operand":{"scalar":5}}]}, simComplete)"#,
                r#"Book:DocChange.delete({"_id":"b2"}, add, simComplete)"#,
            ]
        );
    }

    #[test]
    fn followups_after_revert_are_ordinary_writes() {
        let mut ctx = context();
        ctx.register_model("Audit");
        ctx.insert("Audit", json!({"_id": "log", "reverts": 0})).unwrap();
        ctx.insert("Book", json!({"_id": "b1", "pages": 1})).unwrap();

        let count = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&count);
        ctx.observe_model("Book", move |_, change, followups| {
            if change.flag() == Some(&Flag::SimComplete) {
                *counter.borrow_mut() += 1;
                followups.update("Audit", "log", Diff::set("reverts", json!(*counter.borrow())));
            }
        });

        ctx.begin_round_trip();
        ctx.update("Book", "b1", Diff::set("pages", json!(2))).unwrap();
        ctx.end_round_trip().unwrap();

        assert_eq!(*count.borrow(), 1);
        let audit = ctx.store().get("Audit", "log").unwrap();
        assert_eq!(audit.get("reverts"), Some(&json!(1)));
        // the follow-up ran after the ledger was cleared
        assert!(ctx.ledger().is_empty());
        assert_eq!(ctx.phase(), Phase::Quiescent);
    }

    #[test]
    fn runaway_followups_hit_the_limit() {
        let mut ctx = ReconciliationContext::new(Config::default().with_followup_limit(3));
        ctx.register_model("Counter");
        ctx.insert("Counter", json!({"_id": "c", "n": 0})).unwrap();

        ctx.observe(|_, change, followups| {
            let n = change.doc()["n"].as_i64().unwrap_or(0);
            followups.update("Counter", "c", Diff::set("n", json!(n + 1)));
        });

        let result = ctx.update("Counter", "c", Diff::set("n", json!(1)));
        assert_eq!(result, Err(Error::FollowupLimitExceeded(3)));
    }

    #[test]
    fn unobserve_stops_notifications() {
        let mut ctx = context();
        let seen = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&seen);
        let id = ctx.observe(move |_, _, _| *counter.borrow_mut() += 1);

        ctx.insert("Book", json!({"_id": "a"})).unwrap();
        assert!(ctx.unobserve(id));
        ctx.insert("Book", json!({"_id": "b"})).unwrap();
        assert_eq!(*seen.borrow(), 1);
    }
}
