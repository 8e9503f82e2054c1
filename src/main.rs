//! Session engine daemon.
//!
//! ```text
//!                      ┌───────────────────────────────────────────────┐
//!                      │                SESSION ENGINE                  │
//!                      │                                                │
//!   get_valid_access_  │  ┌──────────┐    ┌─────────────┐    ┌───────┐  │
//!   token()  ──────────┼─▶│ session  │───▶│   refresh   │───▶│ token │  │
//!                      │  │ manager  │    │ coordinator │    │ store │  │
//!                      │  └────┬─────┘    └──────┬──────┘    └───────┘  │
//!                      │       │                 │ one call              │
//!                      │       ▼                 ▼                       │      Auth
//!                      │  ┌──────────┐    ┌─────────────┐                │    backend
//!                      │  │  cache + │    │   circuit   │────────────────┼──▶ /auth/refresh
//!                      │  │ fallback │    │   breaker   │                │
//!                      │  └──────────┘    └─────────────┘                │
//!                      │                                                │
//!   other tabs ◀───────┼── sync channel ◀── refresh / login / logout     │
//!                      │                                                │
//!                      │  health ticks · cache eviction · admin API     │
//!                      └───────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use session_engine::admin::{setup_admin_router, AdminState};
use session_engine::config::{load_config, EngineConfig};
use session_engine::lifecycle::signals::shutdown_signal;
use session_engine::lifecycle::startup::{build_manager, build_origin, spawn_background};
use session_engine::lifecycle::Shutdown;
use session_engine::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "session-engine")]
#[command(about = "Authentication session engine", long_about = None)]
struct Args {
    /// Path to a TOML config file; built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "session-engine starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let origin = build_origin(&config)?;
    let manager = Arc::new(build_manager(&config, &origin)?);
    let info = manager.token_info();
    tracing::info!(
        has_refresh_token = info.has_refresh_token,
        refresh_endpoint = %config.refresh.base_url,
        "Session engine ready"
    );

    let shutdown = Shutdown::new();
    let mut tasks = spawn_background(&manager, &config, &shutdown);

    if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");
        let router = setup_admin_router(AdminState::new(manager.clone(), &config.admin.api_key));
        let mut stop = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = stop.recv().await;
            });
            if let Err(e) = server.await {
                tracing::error!(error = %e, "Admin API failed");
            }
        }));
    }

    shutdown_signal().await;
    shutdown.trigger();
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Background task panicked");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
