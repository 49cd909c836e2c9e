//! Outstanding round-trip counter.
//!
//! The reconciler never reads the raw count; it only reacts to the
//! transitions reported here: 0 -> 1 starts a speculation window, 1 -> 0
//! settles it.

use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};

/// What a counter change meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Transition {
    /// The count left zero
    Started,
    /// The count moved but stayed above zero
    Unchanged,
    /// The count returned to zero
    Settled,
}

/// Number of round trips awaiting a server response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundTrips {
    outstanding: usize,
}

impl RoundTrips {
    pub fn new() -> Self {
        Self::default()
    }

    /// A round trip went out.
    pub fn increment(&mut self) -> Transition {
        self.outstanding += 1;
        if self.outstanding == 1 {
            Transition::Started
        } else {
            Transition::Unchanged
        }
    }

    /// A round trip came back. Fails if none was outstanding.
    pub fn decrement(&mut self) -> Result<Transition> {
        self.outstanding = self
            .outstanding
            .checked_sub(1)
            .ok_or(Error::NoOutstandingRoundTrip)?;
        Ok(if self.outstanding == 0 {
            Transition::Settled
        } else {
            Transition::Unchanged
        })
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn is_idle(&self) -> bool {
        self.outstanding == 0
    }
}
