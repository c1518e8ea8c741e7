//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatch to a dependency:
//!     → bulkhead.rs (bounded concurrency, RAII permit)
//!     → circuit_breaker.rs (refuse while the dependency is failing)
//!     → rate_limiter.rs (per-period call budget)
//!     → timeouts.rs (deadline for the whole retried call)
//!         → retries.rs (re-issue transient failures with backoff.rs delays)
//!     → outcome.rs (classification fed back to the circuit breaker)
//! ```
//!
//! # Design Decisions
//! - Every primitive is owned per dependency; no state is shared across dependencies
//! - Primitives never call each other; the dispatch pipeline composes them
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Circuit breaker prevents cascading failures

pub mod backoff;
pub mod bulkhead;
pub mod circuit_breaker;
pub mod outcome;
pub mod rate_limiter;
pub mod retries;
pub mod timeouts;

pub use bulkhead::{Bulkhead, BulkheadFull, Permit};
pub use circuit_breaker::{CallPermission, CircuitBreaker, CircuitSnapshot, CircuitState};
pub use outcome::{CallOutcome, ClassifyOutcome};
pub use rate_limiter::{RateLimitExceeded, RateLimiter};
pub use retries::{RetryBudget, RetryController, RetryPolicy};
pub use timeouts::{TimeLimitExceeded, TimeLimiter};
