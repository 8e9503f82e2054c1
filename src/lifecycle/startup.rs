//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the origin every tab shares, with its refresh-cookie jar
//! - Build the session manager from a validated configuration
//! - Register health probes against the authentication backend
//! - Start background tasks (health ticks, cache eviction, cross-tab listener)

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::clock::SystemClock;
use crate::config::EngineConfig;
use crate::health::HttpHealthCheck;
use crate::lifecycle::Shutdown;
use crate::refresh::HttpRefreshClient;
use crate::session::{ResilientSessionManager, REFRESH_SERVICE};
use crate::sync::{new_tab_id, LogNavigator, Origin, SyncError};
use crate::token::{FileCookieJar, TokenError};

/// Service name probed alongside the refresh endpoint.
pub const AUTH_SERVICE: &str = "auth-service";

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Invalid backend URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Failed to open cookie jar: {0}")]
    Cookies(#[from] TokenError),

    #[error("Failed to open sync channel: {0}")]
    Sync(#[from] SyncError),
}

/// The origin tabs share. Cookies persist to `token.cookie_file` when set.
pub fn build_origin(config: &EngineConfig) -> Result<Origin, StartupError> {
    let origin = Origin::new();
    Ok(match &config.token.cookie_file {
        Some(path) => origin.with_cookies(Arc::new(FileCookieJar::open(path)?)),
        None => origin,
    })
}

/// Build a manager wired to the configured backend, joined to `origin`.
pub fn build_manager(config: &EngineConfig, origin: &Origin) -> Result<ResilientSessionManager, StartupError> {
    let cookies = origin.cookies().clone();
    let client = Arc::new(HttpRefreshClient::new(&config.refresh)?);
    tracing::info!(endpoint = %client.endpoint(), "Refresh endpoint configured");

    let manager = ResilientSessionManager::new(config, cookies, client, Arc::new(SystemClock)).with_sync(
        origin,
        &config.sync,
        Arc::new(LogNavigator),
        new_tab_id(),
    )?;

    if config.health_check.enabled {
        let url = url::Url::parse(&config.refresh.base_url)?.join(&config.health_check.path)?;
        let check = Arc::new(HttpHealthCheck::new(url, Duration::from_secs(config.health_check.timeout_secs)));
        manager.health().register(AUTH_SERVICE, check.clone());
        manager.health().register(REFRESH_SERVICE, check);
    }

    Ok(manager)
}

/// Spawn every long-running task; each exits on `shutdown`.
pub fn spawn_background(
    manager: &ResilientSessionManager,
    config: &EngineConfig,
    shutdown: &Shutdown,
) -> Vec<JoinHandle<()>> {
    let mut tasks = vec![
        tokio::spawn(manager.health().clone().run(shutdown.subscribe())),
        tokio::spawn(
            manager
                .cache()
                .clone()
                .run_cleanup(Duration::from_secs(config.cache.cleanup_interval_secs), shutdown.subscribe()),
        ),
    ];
    if let Some(sync) = manager.sync() {
        tasks.push(sync.spawn(shutdown.subscribe()));
    }
    tracing::info!(tasks = tasks.len(), "Background tasks started");
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_and_stop() {
        let mut config = EngineConfig::default();
        config.health_check.interval_secs = 3600;
        let manager = build_manager(&config, &Origin::new()).unwrap();
        assert_eq!(manager.health_status().len(), 2);
        assert!(manager.sync().is_some());

        let shutdown = Shutdown::new();
        let tasks = spawn_background(&manager, &config, &shutdown);
        assert_eq!(tasks.len(), 3);

        shutdown.trigger();
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[test]
    fn test_tabs_of_one_origin_share_the_refresh_cookie() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.health_check.enabled = false;
        config.token.cookie_file = Some(dir.path().join("cookies.json").display().to_string());
        let origin = build_origin(&config).unwrap();

        let first = build_manager(&config, &origin).unwrap();
        let second = build_manager(&config, &origin).unwrap();
        first.store_tokens(&crate::token::TokenPair::new("a", "shared-rt", 3600), None).unwrap();

        assert_eq!(second.store().refresh_token().as_deref(), Some("shared-rt"));
        assert!(dir.path().join("cookies.json").exists());
    }

    #[test]
    fn test_bad_backend_url_fails() {
        let mut config = EngineConfig::default();
        config.refresh.base_url = "not a url".into();
        assert!(matches!(build_manager(&config, &Origin::new()), Err(StartupError::Url(_))));
    }
}
