//! Typed dispatch failures.

use std::time::Duration;

use thiserror::Error;

use crate::dispatch::downstream::DownstreamError;
use crate::resilience::{CallOutcome, ClassifyOutcome};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The circuit breaker refused the call.
    #[error("circuit breaker for '{dependency}' is open")]
    Rejected { dependency: String },

    #[error("rate limit exceeded for '{dependency}'")]
    RateLimited { dependency: String },

    #[error("bulkhead for '{dependency}' is full ({max_concurrent_calls} concurrent calls)")]
    BulkheadFull {
        dependency: String,
        max_concurrent_calls: usize,
    },

    #[error("call to '{dependency}' timed out after {timeout:?}")]
    Timeout { dependency: String, timeout: Duration },

    #[error("dependency '{dependency}' failed: {source}")]
    Downstream {
        dependency: String,
        #[source]
        source: DownstreamError,
    },

    /// The caller cancelled the call before it completed.
    #[error("call to '{dependency}' was cancelled")]
    Cancelled { dependency: String },

    #[error("unknown dependency '{dependency}'")]
    UnknownDependency { dependency: String },
}

impl DispatchError {
    /// Stable error kind, used in response bodies and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Rejected { .. } => "REJECTED",
            DispatchError::RateLimited { .. } => "RATE_LIMITED",
            DispatchError::BulkheadFull { .. } => "BULKHEAD_FULL",
            DispatchError::Timeout { .. } => "TIMEOUT",
            DispatchError::Downstream { .. } => "DOWNSTREAM_FAILURE",
            DispatchError::Cancelled { .. } => "CANCELLED",
            DispatchError::UnknownDependency { .. } => "UNKNOWN_DEPENDENCY",
        }
    }

    pub fn dependency(&self) -> &str {
        match self {
            DispatchError::Rejected { dependency }
            | DispatchError::RateLimited { dependency }
            | DispatchError::BulkheadFull { dependency, .. }
            | DispatchError::Timeout { dependency, .. }
            | DispatchError::Downstream { dependency, .. }
            | DispatchError::Cancelled { dependency }
            | DispatchError::UnknownDependency { dependency } => dependency,
        }
    }
}

impl ClassifyOutcome for DispatchError {
    fn outcome(&self) -> CallOutcome {
        match self {
            DispatchError::Timeout { .. } => CallOutcome::Timeout,
            DispatchError::Downstream { source, .. } => source.outcome(),
            DispatchError::Rejected { .. }
            | DispatchError::RateLimited { .. }
            | DispatchError::BulkheadFull { .. }
            | DispatchError::Cancelled { .. }
            | DispatchError::UnknownDependency { .. } => CallOutcome::Rejected,
        }
    }

    fn is_transient(&self) -> bool {
        match self {
            DispatchError::Timeout { .. } => true,
            DispatchError::Downstream { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}
