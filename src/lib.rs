//! Resilient request-dispatch gateway.
//!
//! Wraps calls to named downstream dependencies with a circuit breaker, a
//! rate limiter, a bulkhead, a retry controller and a time limiter, and
//! exposes them over HTTP.

pub mod admin;
pub mod config;
pub mod dispatch;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::GatewayConfig;
pub use dispatch::{DispatchError, DispatchPipeline};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
