//! Token material types and error definitions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Access/refresh token pair as returned by the authentication backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>, expires_in: u64) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_in,
        }
    }
}

// Token values must never reach the logs.
impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Claims read from the access token payload.
///
/// Decoded without signature verification and used only for local expiry
/// bookkeeping. The authorization flags are informational; the backend
/// remains the only authority on what the bearer may do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedClaims {
    /// Subject (user) id.
    pub sub: String,
    /// Expiry, epoch seconds.
    pub exp: u64,
    /// Issued-at, epoch seconds.
    #[serde(default)]
    pub iat: Option<u64>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub mfa_enabled: bool,
}

/// Result of [`crate::token::TokenStore::validate_token`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenValidation {
    pub is_valid: bool,
    pub is_expired: bool,
    /// Expiry, epoch seconds.
    pub expires_at: Option<u64>,
    pub claims: Option<DecodedClaims>,
}

/// Diagnostic view of the stored session. Never contains token values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub has_access_token: bool,
    pub has_refresh_token: bool,
    /// Access token expiry, epoch milliseconds.
    pub expires_at: Option<u64>,
    pub seconds_remaining: Option<u64>,
    pub subject: Option<String>,
}

/// Errors from token decoding and persistence.
#[derive(Debug, Error)]
pub enum TokenError {
    /// Token does not have the three dot-separated JWT segments.
    #[error("Malformed token: expected 3 segments, found {0}")]
    Malformed(usize),

    /// Payload segment is not valid base64url.
    #[error("Token payload is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// Payload is not the expected claims JSON.
    #[error("Token claims are invalid: {0}")]
    Claims(#[from] serde_json::Error),

    /// Cookie persistence failed.
    #[error("Cookie storage error: {0}")]
    Storage(#[from] std::io::Error),
}
