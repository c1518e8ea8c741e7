//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (default dependency exists, names unique)
//! - Validate value ranges (thresholds, limits, timeouts > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use thiserror::Error;
use url::Url;

use crate::config::schema::{DependencyConfig, GatewayConfig};
use crate::resilience::CallOutcome;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.max_body_bytes == 0 {
        errors.push(ValidationError::new("listener.max_body_bytes", "must be greater than 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(ValidationError::new("admin.api_key", "must not be empty when admin is enabled"));
    }

    let mut seen = HashSet::new();
    for dependency in &config.dependencies {
        if !seen.insert(dependency.name.as_str()) {
            errors.push(ValidationError::new(
                format!("dependencies.{}", dependency.name),
                "duplicate dependency name",
            ));
        }
        validate_dependency(dependency, &mut errors);
    }

    if let Some(default) = &config.default_dependency {
        if config.dependency(default).is_none() {
            errors.push(ValidationError::new(
                "default_dependency",
                format!("unknown dependency '{}'", default),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_dependency(dependency: &DependencyConfig, errors: &mut Vec<ValidationError>) {
    let prefix = format!("dependencies.{}", dependency.name);
    let mut check = |ok: bool, field: &str, message: &str| {
        if !ok {
            errors.push(ValidationError::new(format!("{}.{}", prefix, field), message));
        }
    };

    check(!dependency.name.is_empty(), "name", "must not be empty");
    check(
        !dependency.name.contains('/'),
        "name",
        "must not contain '/'",
    );
    match Url::parse(&dependency.base_url) {
        Ok(url) => check(url.scheme() == "http", "base_url", "only http:// endpoints are supported"),
        Err(_) => check(false, "base_url", "not a valid URL"),
    }
    check(
        dependency.attempt_timeout_ms != Some(0),
        "attempt_timeout_ms",
        "must be greater than 0",
    );

    let cb = &dependency.circuit_breaker;
    check(
        cb.failure_rate_threshold > 0.0 && cb.failure_rate_threshold <= 100.0,
        "circuit_breaker.failure_rate_threshold",
        "must be in (0, 100]",
    );
    check(cb.sliding_window_size > 0, "circuit_breaker.sliding_window_size", "must be greater than 0");
    check(cb.minimum_number_of_calls > 0, "circuit_breaker.minimum_number_of_calls", "must be greater than 0");
    check(cb.half_open_trial_calls > 0, "circuit_breaker.half_open_trial_calls", "must be greater than 0");

    let rl = &dependency.rate_limiter;
    check(rl.limit_for_period > 0, "rate_limiter.limit_for_period", "must be greater than 0");
    check(rl.limit_refresh_period_ms > 0, "rate_limiter.limit_refresh_period_ms", "must be greater than 0");

    check(
        dependency.bulkhead.max_concurrent_calls > 0,
        "bulkhead.max_concurrent_calls",
        "must be greater than 0",
    );

    let retry = &dependency.retry;
    check(retry.max_attempts > 0, "retry.max_attempts", "must be at least 1");
    check(
        retry.base_delay_ms <= retry.max_delay_ms,
        "retry.base_delay_ms",
        "must not exceed retry.max_delay_ms",
    );
    check(
        (0.0..=1.0).contains(&retry.jitter_ratio),
        "retry.jitter_ratio",
        "must be in [0, 1]",
    );
    check(
        !retry.retry_on.contains(&CallOutcome::Rejected) && !retry.retry_on.contains(&CallOutcome::Success),
        "retry.retry_on",
        "only failure and timeout outcomes can be retried",
    );
    if let Some(ratio) = retry.budget_ratio {
        check(ratio >= 0.0, "retry.budget_ratio", "must not be negative");
    }

    check(
        dependency.time_limiter.timeout_ms > 0,
        "time_limiter.timeout_ms",
        "must be greater than 0",
    );
}
