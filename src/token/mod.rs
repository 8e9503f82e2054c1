//! Token material subsystem.
//!
//! # Data Flow
//! ```text
//! login / refresh response (TokenPair)
//!     → store.rs
//!         access token → memory only (ArcSwap snapshot)
//!         refresh token → cookie.rs (obfuscated, domain-scoped cookie)
//!     → claims.rs decodes `exp` for expiry bookkeeping
//! ```
//!
//! # Design Decisions
//! - The access token is never serialized to storage
//! - An access token within the safety buffer of expiry reads as absent
//! - Claims are decoded, never verified; they are not a trust boundary

pub mod claims;
pub mod cookie;
pub mod store;
pub mod types;

pub use cookie::{CookieJar, FileCookieJar, MemoryCookieJar};
pub use store::TokenStore;
pub use types::{DecodedClaims, TokenError, TokenInfo, TokenPair, TokenValidation};
