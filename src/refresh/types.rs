//! Refresh types and error definitions.

use std::time::Duration;

use thiserror::Error;

use crate::resilience::Classify;
use crate::token::TokenPair;

/// Errors that can occur while obtaining a fresh access token.
///
/// `Clone` because a single refresh outcome is delivered to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    /// The refresh token was rejected (401).
    #[error("Session expired, please sign in again")]
    SessionExpired,

    /// There is no refresh token to exchange.
    #[error("No refresh token available")]
    NoRefreshToken,

    /// Too many callers are already waiting on the in-flight refresh.
    #[error("Refresh queue is full ({0} waiting)")]
    QueueFull(usize),

    /// This caller gave up waiting; the refresh itself may still finish.
    #[error("Timed out after {0:?} waiting for token refresh")]
    QueueTimeout(Duration),

    /// The refresh call exceeded its own deadline.
    #[error("Refresh request timed out after {0:?}")]
    Timeout(Duration),

    /// The refresh circuit is open; no call was made.
    #[error("Refresh service unavailable, retry in {0:?}")]
    Unavailable(Duration),

    /// Connection-level failure.
    #[error("Network error during refresh: {0}")]
    Network(String),

    /// 5xx from the refresh endpoint.
    #[error("Refresh endpoint returned {0}")]
    Server(u16),

    /// Non-401 client error from the refresh endpoint.
    #[error("Refresh rejected with status {0}")]
    Rejected(u16),

    /// Success status with a body that is not a token pair.
    #[error("Invalid refresh response: {0}")]
    InvalidResponse(String),

    /// New tokens could not be stored locally.
    #[error("Failed to store refreshed tokens: {0}")]
    Storage(String),

    /// The refresh task ended without reporting an outcome.
    #[error("Refresh was aborted")]
    Aborted,
}

impl RefreshError {
    /// Terminal for the current session: the user has to sign in again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RefreshError::SessionExpired | RefreshError::NoRefreshToken)
    }
}

impl Classify for RefreshError {
    fn trips_breaker(&self) -> bool {
        matches!(
            self,
            RefreshError::Timeout(_)
                | RefreshError::Network(_)
                | RefreshError::Server(_)
                | RefreshError::InvalidResponse(_)
        )
    }
}

/// State changes published by the refresh coordinator.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// New token pair stored after a successful refresh.
    TokenRefreshed(TokenPair),
    /// The refresh token is no longer usable; local tokens were cleared.
    SessionExpired,
    /// A recoverable refresh failure; local tokens were cleared.
    RefreshFailed(RefreshError),
}
