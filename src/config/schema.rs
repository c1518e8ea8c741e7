//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.
//! Durations are expressed as integer milliseconds or seconds, as the field
//! suffix says.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::CallOutcome;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, body limits).
    pub listener: ListenerConfig,

    /// Server-level timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Dependency served by `GET /`.
    pub default_dependency: Option<String>,

    /// Downstream dependencies, each with its own resilience guards.
    pub dependencies: Vec<DependencyConfig>,
}

impl GatewayConfig {
    /// Look up a dependency by name.
    pub fn dependency(&self, name: &str) -> Option<&DependencyConfig> {
        self.dependencies.iter().find(|d| d.name == name)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Largest inbound request body accepted, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Server-level timeouts.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Hard ceiling on handling one inbound request, in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// One downstream dependency and its resilience policy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DependencyConfig {
    /// Dependency key used in `/dispatch/{name}` and in metrics labels.
    pub name: String,

    /// Base URL requests are forwarded to (e.g., "http://127.0.0.1:3000").
    pub base_url: String,

    /// Deadline for a single attempt, in milliseconds. The whole call is
    /// still bounded by `time_limiter.timeout_ms`.
    #[serde(default)]
    pub attempt_timeout_ms: Option<u64>,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,

    #[serde(default)]
    pub bulkhead: BulkheadConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub time_limiter: TimeLimiterConfig,
}

impl DependencyConfig {
    /// Create a dependency with default policies.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            attempt_timeout_ms: None,
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limiter: RateLimiterConfig::default(),
            bulkhead: BulkheadConfig::default(),
            retry: RetryConfig::default(),
            time_limiter: TimeLimiterConfig::default(),
        }
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }
}

/// How the circuit breaker aggregates recent outcomes.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SlidingWindowType {
    /// Last `sliding_window_size` calls.
    #[default]
    CountBased,
    /// Calls from the last `sliding_window_size` seconds.
    TimeBased,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failure percentage (0-100] that must be exceeded to open the circuit.
    pub failure_rate_threshold: f64,

    /// Window aggregation strategy.
    pub sliding_window_type: SlidingWindowType,

    /// Calls (count-based) or seconds (time-based) in the window.
    pub sliding_window_size: u32,

    /// Calls that must be recorded before the failure rate is evaluated.
    /// Capped at the window size for count-based windows.
    pub minimum_number_of_calls: u32,

    /// Cool-down in the open state, in milliseconds.
    pub wait_duration_in_open_ms: u64,

    /// Trial calls admitted while half-open; all must succeed to close.
    pub half_open_trial_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            sliding_window_type: SlidingWindowType::CountBased,
            sliding_window_size: 100,
            minimum_number_of_calls: 100,
            wait_duration_in_open_ms: 60_000,
            half_open_trial_calls: 10,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn wait_duration_in_open(&self) -> Duration {
        Duration::from_millis(self.wait_duration_in_open_ms)
    }
}

/// Rate limiter configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Enable rate limiting for this dependency.
    pub enabled: bool,

    /// Calls admitted per refresh period (also the burst capacity).
    pub limit_for_period: u32,

    /// Refresh period in milliseconds.
    pub limit_refresh_period_ms: u64,

    /// How long a call may wait for the next permit, in milliseconds.
    /// Zero rejects immediately when the budget is exhausted.
    pub timeout_ms: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit_for_period: 50,
            limit_refresh_period_ms: 1000,
            timeout_ms: 0,
        }
    }
}

impl RateLimiterConfig {
    pub fn refresh_period(&self) -> Duration {
        Duration::from_millis(self.limit_refresh_period_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Bulkhead configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BulkheadConfig {
    /// Maximum concurrent in-flight calls.
    pub max_concurrent_calls: usize,

    /// How long a call may wait for a free slot, in milliseconds.
    pub max_wait_ms: u64,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 25,
            max_wait_ms: 0,
        }
    }
}

impl BulkheadConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Fraction of each delay that is randomized away (0.0 - 1.0).
    pub jitter_ratio: f64,

    /// Outcomes that trigger another attempt.
    pub retry_on: Vec<CallOutcome>,

    /// Retries allowed per request, e.g. 0.1 for a 10% budget.
    /// `None` disables the budget.
    pub budget_ratio: Option<f64>,

    /// Retries always available on top of the ratio.
    pub budget_reserve: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
            jitter_ratio: 0.1,
            retry_on: vec![CallOutcome::Failure, CallOutcome::Timeout],
            budget_ratio: None,
            budget_reserve: 10,
        }
    }
}

/// Time limiter configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeLimiterConfig {
    /// Deadline for the whole call (all attempts), in milliseconds.
    pub timeout_ms: u64,

    /// Signal cancellation to the in-flight call on expiry.
    pub cancel_running_call: bool,
}

impl Default for TimeLimiterConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            cancel_running_call: true,
        }
    }
}

impl TimeLimiterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
