//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Default cap on observer follow-up rounds per entry point.
pub const DEFAULT_FOLLOWUP_LIMIT: usize = 64;

/// Tunables for a [`ReconciliationContext`](crate::ReconciliationContext).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// How many rounds of observer-issued follow-up writes one call may
    /// trigger before it fails with
    /// [`FollowupLimitExceeded`](crate::Error::FollowupLimitExceeded).
    pub followup_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            followup_limit: DEFAULT_FOLLOWUP_LIMIT,
        }
    }
}

impl Config {
    pub fn with_followup_limit(mut self, limit: usize) -> Self {
        self.followup_limit = limit;
        self
    }
}
