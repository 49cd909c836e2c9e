//! Replay script format.
//!
//! A script lists the models to register and the steps of one client
//! session. All steps are JSON-encoded with a snake_case `type` tag.

use hedge_engine::{AuthoritativeUpdate, Diff, LocalWrite};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A recorded client session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Script {
    /// Models to register before the first step
    #[serde(default)]
    pub models: Vec<String>,
    /// Steps in the order they happened
    pub steps: Vec<Step>,
}

/// One thing that happened during the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    /// A request went out to the server.
    BeginRoundTrip,

    /// A request came back.
    EndRoundTrip,

    /// Local insert. A document without `_id` gets a random one.
    Insert { model: String, doc: Value },

    /// Local update.
    Update { model: String, id: String, diff: Diff },

    /// Local removal.
    Remove { model: String, id: String },

    /// The server sent a full document.
    ServerAdded { model: String, id: String, doc: Value },

    /// The server sent a change.
    ServerChanged { model: String, id: String, diff: Diff },

    /// The server removed a document.
    ServerRemoved { model: String, id: String },
}

/// What the driver does with a step.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    BeginRoundTrip,
    EndRoundTrip,
    Local(LocalWrite),
    Authoritative(AuthoritativeUpdate),
}

impl Script {
    /// Parse a script and fill in missing document ids.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut script: Script = serde_json::from_str(json)?;
        script.assign_ids();
        Ok(script)
    }

    fn assign_ids(&mut self) {
        for step in &mut self.steps {
            if let Step::Insert {
                doc: Value::Object(fields),
                ..
            } = step
            {
                fields
                    .entry(hedge_engine::document::ID_FIELD)
                    .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
            }
        }
    }
}

impl Step {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Step::BeginRoundTrip => "begin_round_trip",
            Step::EndRoundTrip => "end_round_trip",
            Step::Insert { .. } => "insert",
            Step::Update { .. } => "update",
            Step::Remove { .. } => "remove",
            Step::ServerAdded { .. } => "server_added",
            Step::ServerChanged { .. } => "server_changed",
            Step::ServerRemoved { .. } => "server_removed",
        }
    }

    pub fn into_action(self) -> Action {
        match self {
            Step::BeginRoundTrip => Action::BeginRoundTrip,
            Step::EndRoundTrip => Action::EndRoundTrip,
            Step::Insert { model, doc } => Action::Local(LocalWrite::insert(model, doc)),
            Step::Update { model, id, diff } => Action::Local(LocalWrite::update(model, id, diff)),
            Step::Remove { model, id } => Action::Local(LocalWrite::remove(model, id)),
            Step::ServerAdded { model, id, doc } => {
                Action::Authoritative(AuthoritativeUpdate::added(model, id, doc))
            }
            Step::ServerChanged { model, id, diff } => {
                Action::Authoritative(AuthoritativeUpdate::changed(model, id, diff))
            }
            Step::ServerRemoved { model, id } => {
                Action::Authoritative(AuthoritativeUpdate::removed(model, id))
            }
        }
    }
}
