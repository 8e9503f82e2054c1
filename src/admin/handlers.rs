use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::cache::CacheStats;
use crate::health::ServiceHealthSnapshot;
use crate::resilience::CircuitMetrics;
use crate::session::DegradationStatus;
use crate::token::TokenInfo;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub refreshing: bool,
    pub refresh_queue_depth: usize,
    pub refresh_calls: u64,
    pub tab_id: Option<String>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let manager = &state.manager;
    let coordinator = manager.coordinator();
    let degraded = manager.degradation_status().degraded;
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if degraded { "degraded" } else { "operational" },
        uptime_secs: state.started_at.elapsed().as_secs(),
        refreshing: coordinator.is_refreshing(),
        refresh_queue_depth: coordinator.queue_depth(),
        refresh_calls: coordinator.refresh_count(),
        tab_id: manager.sync().map(|s| s.tab_id().to_string()),
    })
}

/// Token metadata only; token values never leave the process.
pub async fn get_session(State(state): State<AdminState>) -> Json<TokenInfo> {
    Json(state.manager.token_info())
}

pub async fn get_circuits(State(state): State<AdminState>) -> Json<Vec<CircuitMetrics>> {
    Json(state.manager.circuit_status())
}

pub async fn open_circuit(
    State(state): State<AdminState>,
    Path(service): Path<String>,
) -> Result<Json<CircuitMetrics>, StatusCode> {
    let breaker = state.manager.breakers().find(&service).ok_or(StatusCode::NOT_FOUND)?;
    tracing::warn!(service = %service, "Circuit opened via admin API");
    breaker.force_open();
    Ok(Json(breaker.metrics()))
}

pub async fn close_circuit(
    State(state): State<AdminState>,
    Path(service): Path<String>,
) -> Result<Json<CircuitMetrics>, StatusCode> {
    let breaker = state.manager.breakers().find(&service).ok_or(StatusCode::NOT_FOUND)?;
    tracing::info!(service = %service, "Circuit closed via admin API");
    breaker.force_close();
    Ok(Json(breaker.metrics()))
}

pub async fn get_health(State(state): State<AdminState>) -> Json<Vec<ServiceHealthSnapshot>> {
    Json(state.manager.health_status())
}

#[derive(Serialize)]
pub struct CacheReport {
    pub stats: CacheStats,
    pub degradation: DegradationStatus,
}

pub async fn get_cache(State(state): State<AdminState>) -> Json<CacheReport> {
    let degradation = state.manager.degradation_status();
    Json(CacheReport {
        stats: degradation.cache,
        degradation,
    })
}
