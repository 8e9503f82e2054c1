//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, thresholds > 0)
//! - Check URLs and bind addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EngineConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{BreakerSettings, EngineConfig, PLACEHOLDER_API_KEY};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Check every section and collect all problems.
pub fn validate_config(config: &EngineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.token.obfuscation_key.is_empty() {
        errors.push(ValidationError::new("token.obfuscation_key", "must not be empty"));
    }
    if config.token.cookie_name.is_empty() {
        errors.push(ValidationError::new("token.cookie_name", "must not be empty"));
    }
    if config.token.cookie_max_age_secs == 0 {
        errors.push(ValidationError::new("token.cookie_max_age_secs", "must be greater than 0"));
    }

    if url::Url::parse(&config.refresh.base_url).is_err() {
        errors.push(ValidationError::new(
            "refresh.base_url",
            format!("'{}' is not a valid URL", config.refresh.base_url),
        ));
    }
    if !config.refresh.path.starts_with('/') {
        errors.push(ValidationError::new("refresh.path", "must start with '/'"));
    }
    if config.refresh.request_timeout_secs == 0 {
        errors.push(ValidationError::new("refresh.request_timeout_secs", "must be greater than 0"));
    }
    if config.refresh.queue_timeout_secs == 0 {
        errors.push(ValidationError::new("refresh.queue_timeout_secs", "must be greater than 0"));
    }
    if config.refresh.queue_capacity == 0 {
        errors.push(ValidationError::new("refresh.queue_capacity", "must be greater than 0"));
    }

    validate_breaker("circuit_breaker.defaults", &config.circuit_breaker.defaults, &mut errors);
    for (service, settings) in &config.circuit_breaker.services {
        validate_breaker(&format!("circuit_breaker.services.{service}"), settings, &mut errors);
    }

    if config.cache.default_ttl_secs == 0 {
        errors.push(ValidationError::new("cache.default_ttl_secs", "must be greater than 0"));
    }
    if config.cache.cleanup_interval_secs == 0 {
        errors.push(ValidationError::new("cache.cleanup_interval_secs", "must be greater than 0"));
    }

    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be at least 1"));
    }
    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            "must not exceed retries.max_delay_ms",
        ));
    }

    if config.health_check.enabled {
        if config.health_check.interval_secs == 0 {
            errors.push(ValidationError::new("health_check.interval_secs", "must be greater than 0"));
        }
        if config.health_check.timeout_secs == 0 {
            errors.push(ValidationError::new("health_check.timeout_secs", "must be greater than 0"));
        }
        if !config.health_check.path.starts_with('/') {
            errors.push(ValidationError::new("health_check.path", "must start with '/'"));
        }
        if config.health_check.tick_ms == 0 {
            errors.push(ValidationError::new("health_check.tick_ms", "must be greater than 0"));
        }
        if config.health_check.unhealthy_threshold == 0 || config.health_check.healthy_threshold == 0 {
            errors.push(ValidationError::new("health_check", "thresholds must be greater than 0"));
        }
    }

    if config.sync.channel_name.is_empty() {
        errors.push(ValidationError::new("sync.channel_name", "must not be empty"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if config.admin.enabled {
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "admin.bind_address",
                format!("'{}' is not a socket address", config.admin.bind_address),
            ));
        }
        if config.admin.api_key.is_empty() || config.admin.api_key == PLACEHOLDER_API_KEY {
            errors.push(ValidationError::new("admin.api_key", "must be set when admin is enabled"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_breaker(field: &str, settings: &BreakerSettings, errors: &mut Vec<ValidationError>) {
    if settings.failure_threshold == 0 {
        errors.push(ValidationError::new(format!("{field}.failure_threshold"), "must be greater than 0"));
    }
    if settings.success_threshold == 0 {
        errors.push(ValidationError::new(format!("{field}.success_threshold"), "must be greater than 0"));
    }
    if settings.timeout_ms == 0 {
        errors.push(ValidationError::new(format!("{field}.timeout_ms"), "must be greater than 0"));
    }
}
