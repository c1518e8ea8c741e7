//! Per-dependency guard registry.
//!
//! # Responsibilities
//! - Own one set of resilience guards per dependency key
//! - Hand guards out as `Arc`s so in-flight calls outlive a reload
//! - Reconcile against a new configuration without losing unchanged state
//!
//! # Design Decisions
//! - `DashMap` keyed by dependency name; no global lock on the hot path
//! - A changed dependency gets fresh guards; calls already holding the old
//!   `Arc` finish against the old guards
//! - Snapshots are plain serializable structs for the admin API

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use url::Url;

use crate::config::DependencyConfig;
use crate::observability::metrics;
use crate::resilience::{
    Bulkhead, CircuitBreaker, CircuitState, RateLimiter, RetryController, TimeLimiter,
};

#[derive(Debug, Error)]
#[error("dependency '{name}' has an invalid base URL: {reason}")]
pub struct InvalidEndpoint {
    pub name: String,
    pub reason: String,
}

/// Everything that protects one dependency.
#[derive(Debug)]
pub struct DependencyGuards {
    pub config: DependencyConfig,
    pub endpoint: Url,
    pub breaker: CircuitBreaker,
    /// `None` when rate limiting is disabled for the dependency.
    pub rate_limiter: Option<RateLimiter>,
    pub bulkhead: Bulkhead,
    pub retry: RetryController,
    pub time_limiter: TimeLimiter,
}

impl DependencyGuards {
    pub fn build(config: DependencyConfig) -> Result<Self, InvalidEndpoint> {
        let endpoint = Url::parse(&config.base_url).map_err(|e| InvalidEndpoint {
            name: config.name.clone(),
            reason: e.to_string(),
        })?;
        if endpoint.scheme() != "http" {
            return Err(InvalidEndpoint {
                name: config.name.clone(),
                reason: format!("unsupported scheme '{}'", endpoint.scheme()),
            });
        }

        let name = config.name.as_str();
        let bulkhead = Bulkhead::new(name, &config.bulkhead);
        metrics::record_bulkhead_available(name, bulkhead.available_permits());

        Ok(Self {
            endpoint,
            breaker: CircuitBreaker::new(name, config.circuit_breaker.clone()),
            rate_limiter: config
                .rate_limiter
                .enabled
                .then(|| RateLimiter::new(name, &config.rate_limiter)),
            bulkhead,
            retry: RetryController::from_config(name, &config.retry),
            time_limiter: TimeLimiter::from_config(name, &config.time_limiter),
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn status(&self) -> DependencyStatus {
        let snapshot = self.breaker.snapshot();
        let now = Instant::now();
        DependencyStatus {
            name: self.config.name.clone(),
            base_url: self.endpoint.to_string(),
            circuit: CircuitStatus {
                state: snapshot.state,
                failure_count: snapshot.failure_count,
                success_count: snapshot.success_count,
                failure_rate: snapshot.failure_rate,
                not_permitted_calls: snapshot.not_permitted_calls,
                window_age_secs: now.duration_since(snapshot.window_start).as_secs_f64(),
                since_transition_secs: now.duration_since(snapshot.last_transition).as_secs_f64(),
            },
            bulkhead: BulkheadStatus {
                max_concurrent_calls: self.bulkhead.max_concurrent_calls(),
                available: self.bulkhead.available_permits(),
                in_flight: self.bulkhead.in_flight(),
            },
            rate_limiter: self.rate_limiter.as_ref().map(|limiter| RateLimiterStatus {
                limit_for_period: self.config.rate_limiter.limit_for_period,
                available_permits: limiter.available_permits(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyStatus {
    pub name: String,
    pub base_url: String,
    pub circuit: CircuitStatus,
    pub bulkhead: BulkheadStatus,
    pub rate_limiter: Option<RateLimiterStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitStatus {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub failure_rate: Option<f64>,
    pub not_permitted_calls: u64,
    pub window_age_secs: f64,
    pub since_transition_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkheadStatus {
    pub max_concurrent_calls: usize,
    pub available: usize,
    pub in_flight: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStatus {
    pub limit_for_period: u32,
    pub available_permits: i64,
}

/// Concurrent map from dependency key to its guards.
#[derive(Debug, Default)]
pub struct DependencyRegistry {
    entries: DashMap<String, Arc<DependencyGuards>>,
}

impl DependencyRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Build a registry, skipping (and logging) dependencies that cannot be served.
    pub fn from_configs(configs: &[DependencyConfig]) -> Self {
        let registry = Self::new();
        registry.apply(configs);
        registry
    }

    /// Reconcile with a new dependency list.
    ///
    /// Unchanged dependencies keep their state, changed ones are rebuilt and
    /// missing ones are dropped. A dependency that fails to build keeps its
    /// previous guards, if any.
    pub fn apply(&self, configs: &[DependencyConfig]) {
        for config in configs {
            let unchanged = self
                .entries
                .get(&config.name)
                .is_some_and(|existing| existing.config == *config);
            if unchanged {
                continue;
            }

            match DependencyGuards::build(config.clone()) {
                Ok(guards) => {
                    let replaced = self
                        .entries
                        .insert(config.name.clone(), Arc::new(guards))
                        .is_some();
                    tracing::info!(dependency = %config.name, base_url = %config.base_url, replaced, "Dependency registered");
                }
                Err(e) => tracing::warn!(error = %e, "Skipping dependency"),
            }
        }

        self.entries.retain(|name, _| {
            let keep = configs.iter().any(|c| &c.name == name);
            if !keep {
                tracing::info!(dependency = %name, "Dependency removed");
            }
            keep
        });
    }

    pub fn get(&self, name: &str) -> Option<Arc<DependencyGuards>> {
        self.entries.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Sorted dependency names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn status(&self, name: &str) -> Option<DependencyStatus> {
        self.get(name).map(|guards| guards.status())
    }

    /// Status of every dependency, sorted by name.
    pub fn statuses(&self) -> Vec<DependencyStatus> {
        let mut all: Vec<DependencyStatus> = self.entries.iter().map(|e| e.value().status()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Force a dependency's circuit back to closed. Returns false if unknown.
    pub fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(guards) => {
                guards.breaker.reset();
                tracing::info!(dependency = %name, "Circuit breaker reset");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
