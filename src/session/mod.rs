//! Application-facing session surface.
//!
//! # Data Flow
//! ```text
//! execute_with_degradation(op, options)
//!     │
//!     ├── service unhealthy ─────────────────────────────┐
//!     ▼                                                  │
//! retry (recoverable errors) → circuit breaker → op()    │
//!     │                                                  │
//!     ├── Ok ──► cache result, source = live             │
//!     │                                                  ▼
//!     └── service fault ──► fresh cache ► stale cache (if allowed) ► fallback
//!                                                  │
//!                                  nothing left ──► classified SessionError
//! ```
//!
//! # Design Decisions
//! - Every error leaving this module is a [`SessionError`]
//! - Validation and authentication errors are never degraded
//! - The engine is an explicit instance; nothing here is global

pub mod error;
pub mod manager;

pub use error::{ErrorKind, SessionError};
pub use manager::{
    DataSource, Degraded, DegradationOptions, DegradationStatus, ResilientSessionManager, REFRESH_SERVICE,
};
