//! Observer registry and change fan-out.
//!
//! Observers see every [`DocChange`] after it has landed in the live cache.
//! They must not mutate the cache directly; instead they queue
//! [`LocalWrite`]s on the [`Followups`] they are handed, which the context
//! applies as ordinary mutations once the current batch has been delivered.

use crate::{diff::Diff, operation::LocalWrite, DocChange, DocId, ModelName};
use serde_json::Value;
use std::{collections::VecDeque, fmt};

/// Handle returned by registration, used to unregister.
pub type ObserverId = u64;

type Callback = Box<dyn FnMut(&str, &DocChange, &mut Followups)>;

/// Writes queued by observers.
#[derive(Debug, Default)]
pub struct Followups {
    queue: VecDeque<LocalWrite>,
}

impl Followups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, write: LocalWrite) {
        self.queue.push_back(write);
    }

    pub fn insert(&mut self, model: impl Into<ModelName>, doc: Value) {
        self.push(LocalWrite::insert(model, doc));
    }

    pub fn update(&mut self, model: impl Into<ModelName>, id: impl Into<DocId>, diff: Diff) {
        self.push(LocalWrite::update(model, id, diff));
    }

    pub fn remove(&mut self, model: impl Into<ModelName>, id: impl Into<DocId>) {
        self.push(LocalWrite::remove(model, id));
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = LocalWrite> + '_ {
        self.queue.drain(..)
    }
}

struct Registration {
    id: ObserverId,
    model: Option<ModelName>,
    callback: Callback,
}

/// Registered observers, notified in registration order.
#[derive(Default)]
pub struct Observers {
    next_id: ObserverId,
    registrations: Vec<Registration>,
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.registrations.len())
            .finish()
    }
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe changes to every model.
    pub fn observe<F>(&mut self, callback: F) -> ObserverId
    where
        F: FnMut(&str, &DocChange, &mut Followups) + 'static,
    {
        self.register(None, Box::new(callback))
    }

    /// Observe changes to one model.
    pub fn observe_model<F>(&mut self, model: impl Into<ModelName>, callback: F) -> ObserverId
    where
        F: FnMut(&str, &DocChange, &mut Followups) + 'static,
    {
        self.register(Some(model.into()), Box::new(callback))
    }

    fn register(&mut self, model: Option<ModelName>, callback: Callback) -> ObserverId {
        self.next_id += 1;
        let id = self.next_id;
        self.registrations.push(Registration {
            id,
            model,
            callback,
        });
        tracing::debug!(observer = id, "observer registered");
        id
    }

    /// Remove an observer. Returns false if it was not registered.
    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|r| r.id != id);
        before != self.registrations.len()
    }

    /// Deliver one change to every matching observer.
    ///
    /// Returns the number of observers called.
    pub fn notify(&mut self, model: &str, change: &DocChange, followups: &mut Followups) -> usize {
        let mut delivered = 0;
        for registration in &mut self.registrations {
            if registration
                .model
                .as_deref()
                .is_some_and(|wanted| wanted != model)
            {
                continue;
            }
            (registration.callback)(model, change, followups);
            delivered += 1;
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}
