//! # Hedge Engine
//!
//! Optimistic-mutation reconciliation for latency-compensated clients.
//!
//! A client that applies its own writes before the server has confirmed them
//! ("speculating") needs a way back: once every outstanding round trip has
//! settled, the speculative state is rolled back and the authoritative state
//! the server sent in the meantime takes over. This crate holds that logic.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches files, sockets or clocks
//! - **Deterministic**: the same sequence of calls always produces the same
//!   events in the same order
//! - **Single-threaded**: every entry point is a synchronous call from one
//!   event loop; nothing suspends mid-mutation
//!
//! ## Core Concepts
//!
//! ### Change algebra
//!
//! A [`Diff`] is either a wholesale [`Diff::Replace`] or an ordered list of
//! [`PartialOp`]s. Applying a diff yields its inverse, see
//! [`apply_with_undo`] and [`invert_diff`].
//!
//! ### Change events
//!
//! Every mutation of the live cache is reported as a [`DocChange`]: an
//! Add, Change or Delete carrying the new document and the undo needed to
//! get back. Derived views ([`DocChange::was`], [`DocChange::changes`],
//! [`DocChange::sub_docs`]) are computed lazily.
//!
//! ### Speculation
//!
//! While at least one round trip is outstanding the [`Reconciler`] is
//! [`Phase::Speculating`]: local writes capture the pre-window value of each
//! field they touch into the [`SimulationLedger`] (first write wins), and
//! authoritative updates are split between the live cache and the ledger.
//! When the count returns to zero the ledger is replayed backwards and
//! cleared.
//!
//! ## Quick Start
//!
//! ```rust
//! use hedge_engine::{Config, Diff, ReconciliationContext};
//! use serde_json::json;
//!
//! let mut ctx = ReconciliationContext::new(Config::default());
//! ctx.register_model("Book");
//! ctx.insert("Book", json!({"_id": "b1", "title": "Dune", "pages": 412}))
//!     .unwrap();
//!
//! // a method call is in flight: write speculatively
//! ctx.begin_round_trip();
//! ctx.update("Book", "b1", Diff::set("pages", json!(500))).unwrap();
//!
//! // the server never confirmed the edit; settling rolls it back
//! let report = ctx.end_round_trip().unwrap();
//! assert_eq!(report.changed.len(), 1);
//!
//! let book = ctx.store().get("Book", "b1").unwrap();
//! assert_eq!(book.get("pages"), Some(&json!(412)));
//! ```
//!
//! ## Persistence
//!
//! [`Store::export_state`] and [`Store::import_state`] move the live cache in
//! and out of a [`StoreSnapshot`], serialized with deterministic ordering.

pub mod change;
pub mod config;
pub mod context;
pub mod diff;
pub mod document;
pub mod error;
pub mod ledger;
pub mod observer;
pub mod operation;
pub mod reconcile;
pub mod snapshot;
pub mod store;
pub mod tracker;

// Re-export main types at crate root
pub use change::{ChangeKind, DocChange, Undo};
pub use config::Config;
pub use context::ReconciliationContext;
pub use diff::{
    apply_diff, apply_lenient, apply_with_undo, diff_values, extract_changed_keys, invert_diff,
    parse_path, Diff, Operand, PartialOp, Path,
};
pub use document::{Document, Flag};
pub use error::{Error, Result};
pub use ledger::{FieldSnapshot, LedgerEntry, SimulationLedger};
pub use observer::{Followups, ObserverId, Observers};
pub use operation::{AuthoritativeUpdate, LocalWrite};
pub use reconcile::{Phase, Reconciler, RevertReport};
pub use snapshot::{StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{Collection, QueryBuilder, Store};
pub use tracker::{RoundTrips, Transition};

/// Type aliases for clarity
pub type ModelName = String;
pub type DocId = String;
