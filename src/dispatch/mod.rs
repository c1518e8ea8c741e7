//! Dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound handler
//!     → pipeline.rs (fixed guard order around one call)
//!     → registry.rs (per-dependency guards, reconciled on reload)
//!     → downstream.rs (outbound HTTP call with deadline + cancellation)
//!     → error.rs (typed failure surfaced to the caller)
//! ```

pub mod downstream;
pub mod error;
pub mod pipeline;
pub mod registry;

pub use downstream::{Downstream, DownstreamError, DownstreamRequest, DownstreamResponse, HttpDownstream};
pub use error::DispatchError;
pub use pipeline::DispatchPipeline;
pub use registry::{DependencyGuards, DependencyRegistry, DependencyStatus};
