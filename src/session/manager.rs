//! Resilient session facade.
//!
//! Composes the token store, the refresh coordinator, circuit breakers, the
//! degradation cache and the health monitor behind the surface the
//! application talks to.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheStats, DegradationCache};
use crate::clock::SharedClock;
use crate::config::{EngineConfig, RetryConfig, SyncConfig};
use crate::health::{HealthMonitor, HealthStatus, ServiceHealthSnapshot};
use crate::observability::metrics;
use crate::refresh::{BreakerRefreshClient, RefreshClient, RefreshCoordinator};
use crate::resilience::{retry_with_backoff, CircuitBreakerManager, CircuitError, CircuitMetrics, Classify};
use crate::session::error::SessionError;
use crate::sync::{open_channel, CrossTabSynchronizer, Navigator, Origin, SyncError};
use crate::token::{CookieJar, TokenInfo, TokenPair, TokenStore};

/// Breaker guarding the refresh endpoint.
pub const REFRESH_SERVICE: &str = "token-refresh";

/// Where a degraded result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Live,
    Cache,
    Stale,
    Fallback,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Live => "live",
            DataSource::Cache => "cache",
            DataSource::Stale => "stale",
            DataSource::Fallback => "fallback",
        }
    }
}

/// Result envelope of [`ResilientSessionManager::execute_with_degradation`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Degraded<T> {
    pub data: T,
    pub source: DataSource,
}

impl<T> Degraded<T> {
    pub fn is_degraded(&self) -> bool {
        self.source != DataSource::Live
    }
}

#[derive(Debug, Clone)]
pub struct DegradationOptions<T> {
    pub cache_key: String,
    pub service_name: String,
    /// Used before the registered fallback for this key.
    pub fallback: Option<T>,
    /// Cache TTL for a live result; the cache default when unset.
    pub ttl: Option<Duration>,
    pub allow_stale: bool,
}

impl<T> DegradationOptions<T> {
    pub fn new(cache_key: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            cache_key: cache_key.into(),
            service_name: service_name.into(),
            fallback: None,
            ttl: None,
            allow_stale: true,
        }
    }

    pub fn with_fallback(mut self, fallback: T) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn allow_stale(mut self, allow: bool) -> Self {
        self.allow_stale = allow;
        self
    }
}

/// Summary for diagnostics surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct DegradationStatus {
    pub degraded: bool,
    pub open_circuits: Vec<String>,
    pub unhealthy_services: Vec<String>,
    pub cache: CacheStats,
}

pub struct ResilientSessionManager {
    store: Arc<TokenStore>,
    coordinator: RefreshCoordinator,
    breakers: Arc<CircuitBreakerManager>,
    cache: Arc<DegradationCache<serde_json::Value>>,
    health: Arc<HealthMonitor>,
    sync: Option<CrossTabSynchronizer>,
    retries: RetryConfig,
    clock: SharedClock,
}

impl ResilientSessionManager {
    /// Assemble the engine. Refresh calls go through the `token-refresh` breaker.
    pub fn new(
        config: &EngineConfig,
        cookies: Arc<dyn CookieJar>,
        client: Arc<dyn RefreshClient>,
        clock: SharedClock,
    ) -> Self {
        let store = Arc::new(TokenStore::new(config.token.clone(), cookies, clock.clone()));
        let breakers = Arc::new(CircuitBreakerManager::new(config.circuit_breaker.clone()));
        let client = Arc::new(BreakerRefreshClient::new(client, breakers.get(REFRESH_SERVICE)));
        let coordinator = RefreshCoordinator::new(store.clone(), client, config.refresh.clone());
        let health = Arc::new(HealthMonitor::new(config.health_check.clone(), breakers.clone()));

        Self {
            store,
            coordinator,
            breakers,
            cache: Arc::new(DegradationCache::from_config(&config.cache)),
            health,
            sync: None,
            retries: config.retries.clone(),
            clock,
        }
    }

    /// Join the origin's cross-tab channel as `tab_id`.
    pub fn with_sync(
        mut self,
        origin: &Origin,
        config: &SyncConfig,
        navigator: Arc<dyn Navigator>,
        tab_id: impl Into<String>,
    ) -> Result<Self, SyncError> {
        let channel = open_channel(origin, config)?;
        self.sync = Some(CrossTabSynchronizer::new(
            tab_id,
            config.clone(),
            channel,
            self.coordinator.clone(),
            navigator,
            self.clock.clone(),
        ));
        Ok(self)
    }

    pub async fn get_valid_access_token(&self) -> Result<String, SessionError> {
        self.coordinator
            .get_valid_access_token()
            .await
            .map_err(SessionError::from)
    }

    pub async fn force_refresh(&self) -> Result<String, SessionError> {
        self.coordinator.force_refresh().await.map_err(SessionError::from)
    }

    /// Store a freshly issued pair (login) and tell the other tabs.
    pub fn store_tokens(&self, pair: &TokenPair, user: Option<serde_json::Value>) -> Result<(), SessionError> {
        self.store.store_tokens(pair, user.clone())?;
        if let Some(sync) = &self.sync {
            if let Err(e) = sync.broadcast_login(pair, user) {
                tracing::warn!(error = %e, "Failed to broadcast login");
            }
        }
        Ok(())
    }

    /// Log out locally and in every other tab.
    pub fn clear_tokens(&self) {
        self.store.clear_tokens();
        if let Some(sync) = &self.sync {
            if let Err(e) = sync.broadcast_logout() {
                tracing::warn!(error = %e, "Failed to broadcast logout");
            }
        }
    }

    pub fn token_info(&self) -> TokenInfo {
        self.store.token_info()
    }

    /// Register the value served for `key` when nothing is cached.
    pub fn register_fallback<T: Serialize>(&self, key: &str, data: &T) -> Result<(), SessionError> {
        let value = serde_json::to_value(data)
            .map_err(|e| SessionError::validation(format!("fallback for {key}: {e}")))?;
        self.cache.register_fallback(key, value);
        Ok(())
    }

    /// Run `operation` live when its service is healthy, with retries and
    /// circuit protection, and fall back to cache, stale cache or registered
    /// data when it cannot produce a result.
    ///
    /// Validation and authentication failures are returned as-is; only
    /// service faults are degraded.
    pub async fn execute_with_degradation<T, F, Fut>(
        &self,
        mut operation: F,
        options: DegradationOptions<T>,
    ) -> Result<Degraded<T>, SessionError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SessionError>>,
    {
        let service = options.service_name.as_str();
        let key = options.cache_key.as_str();

        let error = if self.health.is_healthy(service) {
            let breaker = self.breakers.get(service);
            let live = retry_with_backoff(
                &self.retries,
                |_| {
                    let call = operation();
                    let breaker = breaker.clone();
                    async move { breaker.execute(move || call).await }
                },
                |e: &CircuitError<SessionError>| match e {
                    CircuitError::Open { .. } => false,
                    CircuitError::Timeout { .. } => true,
                    CircuitError::Inner(e) => e.recoverable && e.trips_breaker(),
                },
            )
            .await;

            match live {
                Ok(data) => {
                    match serde_json::to_value(&data) {
                        Ok(value) => self.cache.set(key, value, options.ttl),
                        Err(e) => tracing::warn!(key, error = %e, "Live result not cacheable"),
                    }
                    metrics::record_cache_lookup(DataSource::Live.as_str());
                    return Ok(Degraded {
                        data,
                        source: DataSource::Live,
                    });
                }
                Err(e) => SessionError::from(e),
            }
        } else {
            SessionError::server(503, format!("{service} is unhealthy"))
        };

        if !error.trips_breaker() {
            return Err(error);
        }
        tracing::warn!(service, key, error = %error, "Live call failed, degrading");

        if let Some(hit) = self.cache.get(key) {
            let source = if hit.stale { DataSource::Stale } else { DataSource::Cache };
            if !hit.stale || options.allow_stale {
                match serde_json::from_value::<T>(hit.data) {
                    Ok(data) => return Ok(self.degraded(data, source, service, key)),
                    Err(e) => tracing::warn!(key, error = %e, "Cached value has the wrong shape"),
                }
            }
        }

        if let Some(data) = options.fallback {
            return Ok(self.degraded(data, DataSource::Fallback, service, key));
        }
        if let Some(value) = self.cache.fallback(key) {
            match serde_json::from_value::<T>(value) {
                Ok(data) => return Ok(self.degraded(data, DataSource::Fallback, service, key)),
                Err(e) => tracing::warn!(key, error = %e, "Registered fallback has the wrong shape"),
            }
        }

        Err(error)
    }

    fn degraded<T>(&self, data: T, source: DataSource, service: &str, key: &str) -> Degraded<T> {
        tracing::info!(service, key, source = source.as_str(), "Serving degraded result");
        metrics::record_cache_lookup(source.as_str());
        Degraded { data, source }
    }

    pub fn circuit_status(&self) -> Vec<CircuitMetrics> {
        self.breakers.all_metrics()
    }

    pub fn health_status(&self) -> Vec<ServiceHealthSnapshot> {
        self.health.snapshot()
    }

    pub fn degradation_status(&self) -> DegradationStatus {
        let open_circuits = self.breakers.open_circuits();
        let unhealthy_services: Vec<String> = self
            .health
            .snapshot()
            .into_iter()
            .filter(|s| s.status == HealthStatus::Unhealthy)
            .map(|s| s.service)
            .collect();
        DegradationStatus {
            degraded: !open_circuits.is_empty() || !unhealthy_services.is_empty(),
            open_circuits,
            unhealthy_services,
            cache: self.cache.stats(),
        }
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerManager> {
        &self.breakers
    }

    pub fn cache(&self) -> &Arc<DegradationCache<serde_json::Value>> {
        &self.cache
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn sync(&self) -> Option<&CrossTabSynchronizer> {
        self.sync.as_ref()
    }
}
