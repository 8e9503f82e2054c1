//! Client-side authentication session engine.
//!
//! Keeps an access/refresh token pair valid behind a single in-flight refresh.
//! Tabs of one origin share the session; reads fall back to cached data while
//! the authentication backend is down.

pub mod admin;
pub mod cache;
pub mod clock;
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod refresh;
pub mod resilience;
pub mod session;
pub mod sync;
pub mod token;

pub use config::EngineConfig;
pub use lifecycle::Shutdown;
pub use session::{DataSource, Degraded, DegradationOptions, ResilientSessionManager, SessionError};
pub use token::{TokenPair, TokenStore};
