//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Protected call:
//!     → circuit_breaker.rs (fail fast when open, count classified failures)
//!     → timeouts.rs (hard deadline around the call)
//!     → On failure: retries.rs (retry recoverable errors with backoff.rs)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every protected call has a deadline
//! - Only service faults trip a breaker; caller mistakes never do
//! - Deferred retries live in one table driven by a periodic tick

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerManager, CircuitError, CircuitMetrics, CircuitState, Classify,
};
pub use retries::{retry_with_backoff, RetrySchedule};
