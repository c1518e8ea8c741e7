//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (dispatch outcomes, latency, rejections, retries)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-dependency guard state (circuit state, bulkhead headroom)
//!
//! # Metrics
//! - `gateway_dispatch_total` (counter): dispatches by dependency, outcome
//! - `gateway_dispatch_duration_seconds` (histogram): latency distribution
//! - `gateway_rejections_total` (counter): fast failures by dependency, reason
//! - `gateway_retries_total` (counter): re-issued attempts by dependency
//! - `gateway_circuit_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `gateway_bulkhead_available` (gauge): free bulkhead slots
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, which keeps unit tests quiet
//! - Labels are dependency names from config, so cardinality stays bounded

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::{CallOutcome, CircuitState};

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_dispatch(dependency: &str, outcome: CallOutcome, elapsed: Duration) {
    counter!(
        "gateway_dispatch_total",
        "dependency" => dependency.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!("gateway_dispatch_duration_seconds", "dependency" => dependency.to_string())
        .record(elapsed.as_secs_f64());
}

/// `reason` is the stable error kind, e.g. `rate_limited`.
pub fn record_rejection(dependency: &str, reason: &'static str) {
    counter!(
        "gateway_rejections_total",
        "dependency" => dependency.to_string(),
        "reason" => reason
    )
    .increment(1);
}

pub fn record_retry(dependency: &str) {
    counter!("gateway_retries_total", "dependency" => dependency.to_string()).increment(1);
}

pub fn record_circuit_state(dependency: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::Open => 1.0,
        CircuitState::HalfOpen => 2.0,
    };
    gauge!("gateway_circuit_state", "dependency" => dependency.to_string()).set(value);
}

pub fn record_bulkhead_available(dependency: &str, available: usize) {
    gauge!("gateway_bulkhead_available", "dependency" => dependency.to_string()).set(available as f64);
}
