//! Refresh endpoint client.
//!
//! `POST {base_url}{path}` with `{"refreshToken": ...}`; a success body is a
//! token pair, 401 means the refresh token is dead.

use std::time::Duration;

use std::sync::Arc;

use futures_util::future::BoxFuture;
use reqwest::StatusCode;
use serde::Serialize;

use crate::config::RefreshConfig;
use crate::refresh::types::RefreshError;
use crate::resilience::{CircuitBreaker, CircuitError};
use crate::token::TokenPair;

/// Exchanges a refresh token for a new token pair.
pub trait RefreshClient: Send + Sync {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenPair, RefreshError>>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// [`RefreshClient`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRefreshClient {
    http: reqwest::Client,
    endpoint: url::Url,
    timeout: Duration,
}

impl HttpRefreshClient {
    pub fn new(config: &RefreshConfig) -> Result<Self, url::ParseError> {
        let endpoint = url::Url::parse(&config.base_url)?.join(&config.path)?;
        let timeout = config.request_timeout();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Ok(Self { http, endpoint, timeout })
    }

    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }

    async fn send(&self, refresh_token: &str) -> Result<TokenPair, RefreshError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RefreshError::Timeout(self.timeout)
                } else {
                    RefreshError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            tracing::info!("Refresh token rejected by backend");
            return Err(RefreshError::SessionExpired);
        }
        if status.is_server_error() {
            tracing::warn!(status = %status, "Refresh endpoint server error");
            return Err(RefreshError::Server(status.as_u16()));
        }
        if !status.is_success() {
            tracing::warn!(status = %status, "Refresh request rejected");
            return Err(RefreshError::Rejected(status.as_u16()));
        }

        response
            .json::<TokenPair>()
            .await
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))
    }
}

impl RefreshClient for HttpRefreshClient {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenPair, RefreshError>> {
        Box::pin(self.send(refresh_token))
    }
}

/// Runs every refresh call through a circuit breaker, so one refresh counts
/// once no matter how many callers wait on it.
pub struct BreakerRefreshClient {
    inner: Arc<dyn RefreshClient>,
    breaker: Arc<CircuitBreaker>,
}

impl BreakerRefreshClient {
    pub fn new(inner: Arc<dyn RefreshClient>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }
}

impl RefreshClient for BreakerRefreshClient {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenPair, RefreshError>> {
        Box::pin(async move {
            self.breaker
                .execute(|| self.inner.refresh(refresh_token))
                .await
                .map_err(|e| match e {
                    CircuitError::Open { retry_after, .. } => RefreshError::Unavailable(retry_after),
                    CircuitError::Timeout { after, .. } => RefreshError::Timeout(after),
                    CircuitError::Inner(e) => e,
                })
        })
    }
}
