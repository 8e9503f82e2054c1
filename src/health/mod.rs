//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Periodic tick (active.rs)
//!     → Which services are due? (regular interval, or retry table when failing)
//!     → Probe them concurrently under a timeout
//!     → Update state.rs
//!     → On transition: force the paired circuit open / closed
//!
//! State machine (state.rs):
//!     Healthy ←→ Unhealthy
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - Probes are supplied by the embedding application through [`HealthCheck`]
//! - A service and its circuit share a name
//! - No probe arms its own timer; the tick is the only clock

pub mod active;
pub mod state;

pub use active::{HealthCheck, HealthMonitor, HttpHealthCheck, ServiceHealthSnapshot};
pub use state::{HealthReport, HealthStatus, ServiceHealth};
