//! Call outcomes shared by the circuit breaker and the retry controller.

use serde::{Deserialize, Serialize};

/// Result class of a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Success,
    Failure,
    Timeout,
    /// Not attempted: a guard turned the call away.
    Rejected,
}

impl CallOutcome {
    /// Outcomes that count against a dependency's health.
    pub fn is_failure(self) -> bool {
        matches!(self, CallOutcome::Failure | CallOutcome::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::Failure => "failure",
            CallOutcome::Timeout => "timeout",
            CallOutcome::Rejected => "rejected",
        }
    }
}

/// Errors that can be classified into a [`CallOutcome`].
pub trait ClassifyOutcome {
    fn outcome(&self) -> CallOutcome;

    /// Whether repeating the call could plausibly succeed.
    fn is_transient(&self) -> bool {
        true
    }
}
