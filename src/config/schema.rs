//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the session
//! engine. All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the session engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Token material handling (expiry buffer, refresh cookie).
    pub token: TokenConfig,

    /// Refresh endpoint and single-flight queue settings.
    pub refresh: RefreshConfig,

    /// Circuit breaker defaults and per-service overrides.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Degradation cache settings.
    pub cache: CacheConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Cross-tab synchronization settings.
    pub sync: SyncConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

/// Token store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenConfig {
    /// An access token this close to expiry is treated as already gone.
    pub expiry_buffer_secs: u64,

    /// Name of the cookie holding the refresh token.
    pub cookie_name: String,

    /// Cookie domain scope.
    pub cookie_domain: String,

    /// Set the `secure` attribute (disable only for local development).
    pub cookie_secure: bool,

    /// Cookie max age in seconds.
    pub cookie_max_age_secs: u64,

    /// Key for the reversible refresh-token obfuscation.
    pub obfuscation_key: String,

    /// Persist cookies to this JSON file; in-memory only when unset.
    pub cookie_file: Option<String>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            expiry_buffer_secs: 300,
            cookie_name: "__session_rt".to_string(),
            cookie_domain: "localhost".to_string(),
            cookie_secure: true,
            cookie_max_age_secs: 30 * 24 * 60 * 60,
            obfuscation_key: "session-engine".to_string(),
            cookie_file: None,
        }
    }
}

impl TokenConfig {
    pub fn expiry_buffer(&self) -> Duration {
        Duration::from_secs(self.expiry_buffer_secs)
    }
}

/// Refresh coordinator configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Base URL of the authentication backend.
    pub base_url: String,

    /// Path of the refresh endpoint.
    pub path: String,

    /// Timeout of a single refresh call in seconds.
    pub request_timeout_secs: u64,

    /// How long a queued caller waits for the in-flight refresh, in seconds.
    pub queue_timeout_secs: u64,

    /// Maximum number of callers waiting on one refresh.
    pub queue_capacity: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            path: "/auth/refresh".to_string(),
            request_timeout_secs: 10,
            queue_timeout_secs: 30,
            queue_capacity: 100,
        }
    }
}

impl RefreshConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_timeout_secs)
    }
}

/// Settings for one circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Classified failures before the circuit opens.
    pub failure_threshold: u32,

    /// Consecutive half-open successes before the circuit closes.
    pub success_threshold: u32,

    /// Time spent open before a probe is allowed, in milliseconds.
    pub recovery_timeout_ms: u64,

    /// Hard timeout around every protected operation, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout_ms: 60_000,
            timeout_ms: 10_000,
        }
    }
}

impl BreakerSettings {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Settings applied to any service without an override.
    pub defaults: BreakerSettings,

    /// Per-service overrides keyed by service name.
    pub services: HashMap<String, BreakerSettings>,
}

impl CircuitBreakerConfig {
    /// Settings for a named service.
    pub fn for_service(&self, service: &str) -> BreakerSettings {
        self.services.get(service).copied().unwrap_or(self.defaults)
    }
}

/// Degradation cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default freshness TTL in seconds.
    pub default_ttl_secs: u64,

    /// How long a stale entry is retained past its TTL, in seconds.
    pub stale_retention_secs: u64,

    /// Interval between eviction sweeps, in seconds.
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            stale_retention_secs: 3600,
            cleanup_interval_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn stale_retention(&self) -> Duration {
        Duration::from_secs(self.stale_retention_secs)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable health polling.
    pub enabled: bool,

    /// Health endpoint path on the authentication backend.
    pub path: String,

    /// Interval between probes of a healthy service, in seconds.
    pub interval_secs: u64,

    /// Probe timeout in seconds.
    pub timeout_secs: u64,

    /// Resolution of the scheduler tick, in milliseconds.
    pub tick_ms: u64,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/health".to_string(),
            interval_secs: 30,
            timeout_secs: 5,
            tick_ms: 1000,
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

/// Which cross-tab transport to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportPreference {
    /// Broadcast channel when the platform has one, storage events otherwise.
    Auto,
    Broadcast,
    Storage,
}

/// Cross-tab synchronization configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Application-scoped channel name.
    pub channel_name: String,

    /// Transport selection.
    pub transport: TransportPreference,

    /// Where a tab is sent after logout or session expiry.
    pub sign_in_path: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            channel_name: "auth-session-sync".to_string(),
            transport: TransportPreference::Auto,
            sign_in_path: "/auth/login".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Diagnostics API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the diagnostics API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Diagnostics API bind address.
    pub bind_address: String,
}

/// Placeholder shipped in the default config; rejected by validation.
pub const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_API_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
