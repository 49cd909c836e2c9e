//! Error types for the hedge engine.

use crate::{DocId, ModelName};
use thiserror::Error;

/// All possible errors from the hedge engine.
///
/// Only the mutation paths raise these. Reconciliation (revert) never fails:
/// inconsistencies found there are logged and repaired in place.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Diff errors
    #[error("malformed diff: {0}")]
    MalformedDiff(String),

    // Cache errors
    #[error("model not found: {0}")]
    ModelNotFound(ModelName),

    #[error("document not found: {0}")]
    DocumentNotFound(DocId),

    #[error("document already exists: {0}")]
    DocumentAlreadyExists(DocId),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    // Snapshot errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    // Round-trip errors
    #[error("no outstanding round trip to settle")]
    NoOutstandingRoundTrip,

    #[error("observer follow-ups exceeded {0} rounds")]
    FollowupLimitExceeded(usize),
}

impl Error {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedDiff(message.into())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
