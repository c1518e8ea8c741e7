//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a failed attempt may be repeated
//! - Execute retries with exponential backoff + jitter
//! - Enforce retry budget (retries per request ratio)
//!
//! # Design Decisions
//! - Only outcomes listed in the policy are retried, and only transient errors
//! - Rejected calls (open circuit, rate limit) are never retried
//! - Jittered backoff prevents thundering herd
//! - Retry budget prevents retry storms under load

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::observability::metrics;
use crate::resilience::backoff::Backoff;
use crate::resilience::{CallOutcome, ClassifyOutcome};

/// Immutable retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub retryable_outcomes: Vec<CallOutcome>,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Backoff::new(
                Duration::from_millis(config.base_delay_ms),
                Duration::from_millis(config.max_delay_ms),
                config.jitter_ratio,
            ),
            retryable_outcomes: config.retry_on.clone(),
        }
    }

    /// Whether an error may be retried, ignoring attempt limits and budget.
    pub fn is_retryable<E: ClassifyOutcome>(&self, error: &E) -> bool {
        let outcome = error.outcome();
        outcome.is_failure() && self.retryable_outcomes.contains(&outcome) && error.is_transient()
    }
}

/// Limits retries to a fraction of requests.
///
/// Each request deposits `ratio` tokens, each retry withdraws one. The
/// balance starts at `reserve` and is capped at `reserve` (at least one)
/// plus one request's deposit.
#[derive(Debug)]
pub struct RetryBudget {
    ratio: f64,
    cap: f64,
    balance: Mutex<f64>,
}

impl RetryBudget {
    pub fn new(ratio: f64, reserve: u32) -> Self {
        let cap = f64::from(reserve.max(1)) + ratio.max(0.0);
        Self {
            ratio: ratio.max(0.0),
            cap,
            balance: Mutex::new(f64::from(reserve)),
        }
    }

    pub fn record_request(&self) {
        let mut balance = self.balance.lock().expect("retry budget mutex poisoned");
        *balance = (*balance + self.ratio).min(self.cap);
    }

    /// Withdraw one retry if the budget allows it.
    pub fn can_retry(&self) -> bool {
        let mut balance = self.balance.lock().expect("retry budget mutex poisoned");
        if *balance >= 1.0 {
            *balance -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Re-issues failed attempts under a bounded policy.
#[derive(Debug)]
pub struct RetryController {
    name: String,
    policy: RetryPolicy,
    budget: Option<RetryBudget>,
}

impl RetryController {
    pub fn new(name: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            budget: None,
        }
    }

    pub fn from_config(name: impl Into<String>, config: &RetryConfig) -> Self {
        let controller = Self::new(name, RetryPolicy::from_config(config));
        match config.budget_ratio {
            Some(ratio) => controller.with_budget(RetryBudget::new(ratio, config.budget_reserve)),
            None => controller,
        }
    }

    pub(crate) fn with_budget(mut self, budget: RetryBudget) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `attempt` until it succeeds, a non-retryable error occurs, or the
    /// attempts (or the budget) run out. The attempt number starts at 1.
    /// On exhaustion the last error is returned.
    pub async fn execute<F, Fut, T, E>(&self, mut attempt: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyOutcome + std::fmt::Display,
    {
        if let Some(budget) = &self.budget {
            budget.record_request();
        }

        let mut attempt_number = 0;
        loop {
            attempt_number += 1;
            let error = match attempt(attempt_number).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if attempt_number >= self.policy.max_attempts || !self.policy.is_retryable(&error) {
                return Err(error);
            }
            if let Some(budget) = &self.budget {
                if !budget.can_retry() {
                    tracing::warn!(dependency = %self.name, attempt = attempt_number, "Retry budget exhausted");
                    return Err(error);
                }
            }

            let delay = self.policy.backoff.delay(attempt_number);
            tracing::info!(
                dependency = %self.name,
                attempt = attempt_number,
                outcome = error.outcome().as_str(),
                delay = ?delay,
                error = %error,
                "Retrying call"
            );
            metrics::record_retry(&self.name);
            tokio::time::sleep(delay).await;
        }
    }
}
