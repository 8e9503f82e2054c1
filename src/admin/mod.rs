//! Diagnostics API.
//!
//! Read-only views of the session, circuits, health and cache, plus manual
//! circuit overrides. Every route requires the configured bearer key.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::time::Instant;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::session::ResilientSessionManager;

#[derive(Clone)]
pub struct AdminState {
    pub manager: Arc<ResilientSessionManager>,
    pub api_key: Arc<str>,
    pub started_at: Instant,
}

impl AdminState {
    pub fn new(manager: Arc<ResilientSessionManager>, api_key: &str) -> Self {
        Self {
            manager,
            api_key: Arc::from(api_key),
            started_at: Instant::now(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/session", get(get_session))
        .route("/admin/circuits", get(get_circuits))
        .route("/admin/circuits/{service}/open", post(open_circuit))
        .route("/admin/circuits/{service}/close", post(close_circuit))
        .route("/admin/health", get(get_health))
        .route("/admin/cache", get(get_cache))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
