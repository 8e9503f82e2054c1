//! Token refresh subsystem.
//!
//! # Data Flow
//! ```text
//! get_valid_access_token()
//!     │
//!     ├── store has a token outside the buffer ──► return it
//!     │
//!     ▼
//! RefreshCoordinator::join()
//!     ├── nothing in flight ──► become leader, spawn refresh task
//!     └── in flight ──────────► queue (bounded), wait with timeout
//!                                   │
//!          refresh task ──► RefreshClient::refresh()
//!                │
//!                ├── Ok(pair) ──► store tokens, TokenRefreshed
//!                ├── 401 ───────► clear tokens, SessionExpired
//!                └── other ─────► clear tokens, RefreshFailed
//!                │
//!                ▼
//!          every waiter receives the same outcome
//! ```
//!
//! # Design Decisions
//! - The flight state is a plain mutex held only for bookkeeping, never
//!   across an await
//! - Waiters are oneshot channels; dropping a waiter never affects the flight
//! - A missing refresh token short-circuits without a network call

pub mod client;
pub mod coordinator;
pub mod types;

pub use client::{BreakerRefreshClient, HttpRefreshClient, RefreshClient};
pub use coordinator::RefreshCoordinator;
pub use types::{RefreshError, SessionEvent};
