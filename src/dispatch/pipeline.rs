//! The dispatch pipeline.
//!
//! # Data Flow
//! ```text
//! dispatch(dependency, request)
//!     → registry lookup (unknown → UNKNOWN_DEPENDENCY)
//!     → Bulkhead.enter (→ BULKHEAD_FULL)
//!     → CircuitBreaker.allow (→ REJECTED)
//!     → RateLimiter.acquire (→ RATE_LIMITED, breaker told REJECTED)
//!     → TimeLimiter( Retry( Downstream.call ) ) (→ TIMEOUT / DOWNSTREAM_FAILURE / CANCELLED)
//!     → CircuitBreaker.record_outcome
//!     → Bulkhead permit released
//! ```
//!
//! # Design Decisions
//! - The first failing stage wins; later stages never run
//! - Once the breaker admits a call, exactly one outcome is recorded, even
//!   if the dispatch future is dropped midway (recorded as REJECTED)
//! - A call the caller cancelled says nothing about the dependency's health
//!   and is recorded as REJECTED
//! - Running out of time is TIMEOUT whichever timer fired first
//! - The permit is released after the outcome is recorded, on every path
//! - Each attempt's deadline is the overall deadline, or the per-attempt
//!   timeout when that is earlier

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::dispatch::downstream::{Downstream, DownstreamRequest, DownstreamResponse};
use crate::dispatch::error::DispatchError;
use crate::dispatch::registry::{DependencyGuards, DependencyRegistry};
use crate::observability::metrics;
use crate::resilience::{CallOutcome, CallPermission, CircuitBreaker, ClassifyOutcome};

/// Records REJECTED into the breaker unless an outcome was recorded explicitly.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    permission: CallPermission,
    recorded: bool,
}

impl<'a> Admission<'a> {
    fn new(breaker: &'a CircuitBreaker, permission: CallPermission) -> Self {
        Self {
            breaker,
            permission,
            recorded: false,
        }
    }

    fn record(mut self, outcome: CallOutcome) {
        self.recorded = true;
        self.breaker.record_outcome(self.permission, outcome);
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.recorded {
            self.breaker
                .record_outcome(self.permission, CallOutcome::Rejected);
        }
    }
}

/// Single entry point for calling a dependency through its guards.
#[derive(Clone)]
pub struct DispatchPipeline {
    registry: Arc<DependencyRegistry>,
    downstream: Arc<dyn Downstream>,
}

impl DispatchPipeline {
    pub fn new(registry: Arc<DependencyRegistry>, downstream: Arc<dyn Downstream>) -> Self {
        Self {
            registry,
            downstream,
        }
    }

    pub fn registry(&self) -> &Arc<DependencyRegistry> {
        &self.registry
    }

    /// Call `dependency` with `request`.
    pub async fn dispatch(
        &self,
        dependency: &str,
        request: DownstreamRequest,
    ) -> Result<DownstreamResponse, DispatchError> {
        self.dispatch_with_cancel(dependency, request, &CancellationToken::new())
            .await
    }

    /// Like [`dispatch`](Self::dispatch); cancelling `cancel` cancels the
    /// in-flight downstream attempt and fails the call with CANCELLED.
    pub async fn dispatch_with_cancel(
        &self,
        dependency: &str,
        request: DownstreamRequest,
        cancel: &CancellationToken,
    ) -> Result<DownstreamResponse, DispatchError> {
        let guards = self
            .registry
            .get(dependency)
            .ok_or_else(|| DispatchError::UnknownDependency {
                dependency: dependency.to_string(),
            })?;

        let started = Instant::now();
        let result = self.run_guarded(&guards, request, cancel).await;
        let outcome = match &result {
            Ok(_) => CallOutcome::Success,
            Err(e) => e.outcome(),
        };

        metrics::record_dispatch(dependency, outcome, started.elapsed());
        match &result {
            Ok(response) => {
                tracing::debug!(dependency, status = %response.status, elapsed = ?started.elapsed(), "Dispatch succeeded")
            }
            Err(e) if outcome == CallOutcome::Rejected => {
                metrics::record_rejection(dependency, e.kind());
                tracing::debug!(dependency, kind = e.kind(), "Dispatch rejected");
            }
            Err(e) => {
                tracing::warn!(dependency, kind = e.kind(), error = %e, elapsed = ?started.elapsed(), "Dispatch failed")
            }
        }
        result
    }

    async fn run_guarded(
        &self,
        guards: &DependencyGuards,
        request: DownstreamRequest,
        cancel: &CancellationToken,
    ) -> Result<DownstreamResponse, DispatchError> {
        let name = guards.name();
        let config = &guards.config;

        let permit = guards
            .bulkhead
            .enter(config.bulkhead.max_wait())
            .await
            .map_err(|e| DispatchError::BulkheadFull {
                dependency: name.to_string(),
                max_concurrent_calls: e.max_concurrent_calls,
            })?;
        metrics::record_bulkhead_available(name, guards.bulkhead.available_permits());

        let Some(permission) = guards.breaker.allow() else {
            drop(permit);
            metrics::record_bulkhead_available(name, guards.bulkhead.available_permits());
            return Err(DispatchError::Rejected {
                dependency: name.to_string(),
            });
        };
        let admission = Admission::new(&guards.breaker, permission);

        if let Some(limiter) = &guards.rate_limiter {
            limiter
                .acquire(config.rate_limiter.timeout())
                .await
                .map_err(|_| DispatchError::RateLimited {
                    dependency: name.to_string(),
                })?;
        }

        let attempt_timeout = config.attempt_timeout();
        let overall_timeout = guards.time_limiter.timeout();
        let overall_deadline = Instant::now() + overall_timeout;
        let request = &request;
        let limited = guards
            .time_limiter
            .execute(cancel, |deadline, token| {
                guards.retry.execute(move |attempt| {
                    let attempt_deadline = attempt_timeout
                        .map(|timeout| (Instant::now() + timeout).min(deadline))
                        .unwrap_or(deadline);
                    tracing::trace!(dependency = name, attempt, "Calling dependency");
                    self.downstream
                        .call(&guards.endpoint, request.clone(), attempt_deadline, token.clone())
                })
            })
            .await;

        let result = match limited {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) | Err(_) if cancel.is_cancelled() => Err(DispatchError::Cancelled {
                dependency: name.to_string(),
            }),
            Ok(Err(source)) if source.outcome() == CallOutcome::Timeout => Err(DispatchError::Timeout {
                dependency: name.to_string(),
                timeout: expired_timeout(attempt_timeout, overall_timeout, overall_deadline),
            }),
            Ok(Err(source)) => Err(DispatchError::Downstream {
                dependency: name.to_string(),
                source,
            }),
            Err(expired) => Err(DispatchError::Timeout {
                dependency: name.to_string(),
                timeout: expired.timeout,
            }),
        };

        admission.record(match &result {
            Ok(_) => CallOutcome::Success,
            Err(e) => e.outcome(),
        });
        drop(permit);
        metrics::record_bulkhead_available(name, guards.bulkhead.available_permits());
        result
    }
}

/// The timeout that ran out when a downstream attempt hit its deadline.
fn expired_timeout(attempt: Option<Duration>, overall: Duration, overall_deadline: Instant) -> Duration {
    match attempt {
        Some(attempt) if Instant::now() < overall_deadline => attempt,
        _ => overall,
    }
}
