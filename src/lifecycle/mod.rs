//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Cookie jar → Refresh client → Session manager
//!     → Health probes → Cross-tab channel → Background tasks
//!
//! Shutdown (shutdown.rs):
//!     Signal received (signals.rs) → broadcast → every task leaves its loop
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then background tasks
//! - Any startup error is fatal
//! - Background tasks own no state the manager needs after shutdown

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
