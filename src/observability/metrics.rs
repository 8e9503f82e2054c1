//! Metrics collection and exposition.
//!
//! # Metrics
//! - `session_refresh_total` (counter): refresh calls by outcome
//! - `session_refresh_queue_depth` (gauge): callers waiting on a refresh
//! - `session_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `session_circuit_rejections_total` (counter): fail-fast rejections
//! - `session_cache_lookups_total` (counter): degradation results by source
//! - `session_sync_messages_total` (counter): cross-tab messages by direction
//! - `session_service_health` (gauge): 1=healthy, 0=unhealthy

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::CircuitState;

/// Install the Prometheus exporter on `addr`. Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_refresh(outcome: &'static str) {
    metrics::counter!("session_refresh_total", "outcome" => outcome).increment(1);
}

pub fn record_refresh_queue_depth(depth: usize) {
    metrics::gauge!("session_refresh_queue_depth").set(depth as f64);
}

pub fn record_circuit_state(service: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    metrics::gauge!("session_circuit_state", "service" => service.to_string()).set(value);
}

pub fn record_circuit_rejection(service: &str) {
    metrics::counter!("session_circuit_rejections_total", "service" => service.to_string())
        .increment(1);
}

pub fn record_cache_lookup(source: &'static str) {
    metrics::counter!("session_cache_lookups_total", "source" => source).increment(1);
}

pub fn record_sync_message(direction: &'static str, kind: &'static str) {
    metrics::counter!(
        "session_sync_messages_total",
        "direction" => direction,
        "type" => kind
    )
    .increment(1);
}

pub fn record_service_health(service: &str, healthy: bool) {
    metrics::gauge!("session_service_health", "service" => service.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}
