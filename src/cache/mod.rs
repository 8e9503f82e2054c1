//! Degradation cache subsystem.
//!
//! # Data Flow
//! ```text
//! live result → degradation.rs set(key, data, ttl)
//!
//! outage:
//!     get(key) → fresh hit      (age <= ttl)
//!              → stale hit      (ttl < age <= ttl + retention, caller opts in)
//!              → fallback(key)  (hand-registered default)
//!              → nothing        (classified error upstream)
//! ```
//!
//! # Design Decisions
//! - Staleness is computed on read; entries are evicted lazily and by a
//!   periodic sweep
//! - Fallback values live in a separate registry and never expire

pub mod degradation;

pub use degradation::{CacheHit, CacheStats, DegradationCache};
