//! Cross-tab session synchronization.
//!
//! # Data Flow
//! ```text
//! local change (login, refresh, logout)
//!     │
//!     ▼
//! CrossTabSynchronizer::broadcast_*()
//!     │  {type, payload, timestamp, tabId} as JSON
//!     ▼
//! SyncChannel ── broadcast hub, or storage write-then-clear
//!     │
//!     ▼
//! other tabs: handle_message()
//!     ├── own tabId ───────► ignored
//!     ├── LOGIN ───────────► adopt, or resolve conflict by expiry
//!     ├── TOKEN_REFRESH ───► adopt if newer
//!     └── LOGOUT / EXPIRED ► clear store, redirect to sign-in
//! ```
//!
//! # Design Decisions
//! - The synchronizer only sees the [`SyncChannel`] capability; the transport
//!   is chosen once by [`open_channel`]
//! - Conflicts are decided by access token expiry with a tab id tie-break,
//!   so both tabs reach the same answer independently
//! - Tokens received from other tabs go straight into the store, never
//!   through the refresh coordinator, so they are not echoed back

pub mod channel;
pub mod message;
pub mod synchronizer;

pub use channel::{open_channel, Origin, SharedStorage, SyncChannel, SyncError, SyncListener, Transport};
pub use message::{ConflictAction, SyncMessage, SyncMessageType};
pub use synchronizer::{new_tab_id, CrossTabSynchronizer, ListenerHandle, LogNavigator, Navigator, VisibilityCheck};
