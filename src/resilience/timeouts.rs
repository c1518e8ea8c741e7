//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap a call with a deadline
//! - Signal cancellation to the call on expiry
//! - Return immediately on expiry; a late result is dropped with the future
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Cancellation is cooperative through a `CancellationToken` handed to the call
//! - Timeout errors are distinct from other errors (504 at the HTTP edge)

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::TimeLimiterConfig;

/// Returned when the wrapped call missed its deadline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("call to '{name}' timed out after {timeout:?}")]
pub struct TimeLimitExceeded {
    pub name: String,
    pub timeout: Duration,
}

/// Bounds the latency of one call.
#[derive(Debug, Clone)]
pub struct TimeLimiter {
    name: String,
    timeout: Duration,
    cancel_running_call: bool,
}

impl TimeLimiter {
    pub fn new(name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            timeout,
            cancel_running_call: true,
        }
    }

    pub fn from_config(name: impl Into<String>, config: &TimeLimiterConfig) -> Self {
        Self {
            name: name.into(),
            timeout: config.timeout(),
            cancel_running_call: config.cancel_running_call,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `call` with a deadline of now + timeout.
    ///
    /// `call` receives the deadline and a child of `parent`; the child is
    /// cancelled when the deadline passes. The caller does not wait for the
    /// call to acknowledge cancellation.
    pub async fn execute<F, Fut, T>(
        &self,
        parent: &CancellationToken,
        call: F,
    ) -> Result<T, TimeLimitExceeded>
    where
        F: FnOnce(Instant, CancellationToken) -> Fut,
        Fut: Future<Output = T>,
    {
        let deadline = Instant::now() + self.timeout;
        let token = parent.child_token();

        match tokio::time::timeout_at(deadline, call(deadline, token.clone())).await {
            Ok(value) => Ok(value),
            Err(_) => {
                if self.cancel_running_call {
                    token.cancel();
                }
                tracing::warn!(dependency = %self.name, timeout = ?self.timeout, "Call timed out");
                Err(TimeLimitExceeded {
                    name: self.name.clone(),
                    timeout: self.timeout,
                })
            }
        }
    }
}
