//! Logs and metrics.
//!
//! # Data Flow
//! ```text
//! dispatch pipeline, breaker transitions, config reloads
//!     → logging.rs (tracing subscriber, pretty or JSON on stdout)
//!     → metrics.rs (per-dependency counters and gauges)
//!
//! Consumers:
//!     → log shipper reading stdout
//!     → Prometheus scraping the exporter listener
//! ```
//!
//! Every metric carries a `dependency` label so one misbehaving dependency
//! can be told apart from the rest.

pub mod logging;
pub mod metrics;
