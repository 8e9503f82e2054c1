//! Classified errors surfaced to the application.
//!
//! Lower layers report raw failures; everything that leaves the session
//! manager is reclassified here with a user-facing message and a
//! recoverability flag.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::refresh::RefreshError;
use crate::resilience::{CircuitError, Classify};
use crate::token::TokenError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connectivity or timeout.
    Network,
    /// Invalid or expired credentials.
    Authentication,
    /// Bad caller input.
    Validation,
    /// 5xx-class backend failure.
    Server,
    /// Identity provider failure.
    OAuth,
}

impl ErrorKind {
    fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::Network => "Unable to reach the server. Check your connection and try again.",
            ErrorKind::Authentication => "Your session has expired. Please sign in again.",
            ErrorKind::Validation => "Some of the information provided is invalid.",
            ErrorKind::Server => "The service is temporarily unavailable. Please try again shortly.",
            ErrorKind::OAuth => "Sign-in with the external provider failed. Please try again.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{kind:?} error: {message}")]
pub struct SessionError {
    pub kind: ErrorKind,
    /// Diagnostic detail; not meant for end users.
    pub message: String,
    pub user_message: &'static str,
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// The refresh token is gone; the user has to sign in again.
    pub session_expired: bool,
}

impl SessionError {
    fn new(kind: ErrorKind, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            user_message: kind.user_message(),
            recoverable,
            retry_after: None,
            status: None,
            session_expired: false,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message, true).with_retry_after(Duration::from_secs(5))
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message, false)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message, false)
    }

    /// 500 is treated as an internal fault and not worth retrying; other
    /// 5xx statuses are.
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        let mut error = Self::new(ErrorKind::Server, message, status != 500);
        error.status = Some(status);
        if error.recoverable {
            error.retry_after = Some(Duration::from_secs(30));
        }
        error
    }

    pub fn oauth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OAuth, message, true)
    }

    /// Classify an HTTP status from an auth endpoint.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            401 | 403 => Self::authentication(message).with_status(status),
            408 | 429 => Self::network(message).with_status(status),
            400..=499 => Self::validation(message).with_status(status),
            _ => Self::server(status, message),
        }
    }

    /// The refresh token was rejected or missing.
    pub fn session_expired(message: impl Into<String>) -> Self {
        let mut error = Self::authentication(message);
        error.session_expired = true;
        error
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

impl Classify for SessionError {
    fn trips_breaker(&self) -> bool {
        matches!(self.kind, ErrorKind::Network | ErrorKind::Server | ErrorKind::OAuth)
    }
}

impl From<RefreshError> for SessionError {
    fn from(error: RefreshError) -> Self {
        let message = error.to_string();
        match error {
            RefreshError::SessionExpired | RefreshError::NoRefreshToken => Self::session_expired(message),
            RefreshError::QueueFull(_) => Self::server(503, message).with_retry_after(Duration::from_secs(1)),
            RefreshError::QueueTimeout(_) | RefreshError::Timeout(_) | RefreshError::Network(_) => {
                Self::network(message)
            }
            RefreshError::Aborted => Self::network(message),
            RefreshError::Unavailable(retry_after) => Self::server(503, message).with_retry_after(retry_after),
            RefreshError::Server(status) => Self::server(status, message),
            RefreshError::Rejected(status) => Self::from_status(status, message),
            RefreshError::InvalidResponse(_) => Self::server(502, message),
            RefreshError::Storage(_) => Self::server(500, message),
        }
    }
}

impl From<TokenError> for SessionError {
    fn from(error: TokenError) -> Self {
        match error {
            TokenError::Storage(e) => Self::server(500, format!("token storage: {e}")),
            other => Self::validation(other.to_string()),
        }
    }
}

impl<E: Into<SessionError>> From<CircuitError<E>> for SessionError {
    fn from(error: CircuitError<E>) -> Self {
        match error {
            CircuitError::Open { service, retry_after } => {
                Self::server(503, format!("circuit for {service} is open")).with_retry_after(retry_after)
            }
            CircuitError::Timeout { service, after } => {
                Self::network(format!("{service} did not respond within {after:?}"))
            }
            CircuitError::Inner(e) => e.into(),
        }
    }
}
