//! Diagnostics API over a real listener.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;
use tokio::net::TcpListener;

use session_engine::admin::{setup_admin_router, AdminState};
use session_engine::lifecycle::startup::build_manager;
use session_engine::session::REFRESH_SERVICE;
use session_engine::sync::Origin;
use session_engine::{ResilientSessionManager, TokenPair};

mod common;
use common::engine_config;

const KEY: &str = "test-admin-key";

async fn serve() -> (SocketAddr, Arc<ResilientSessionManager>) {
    let manager = Arc::new(build_manager(&engine_config("http://127.0.0.1:9"), &Origin::new()).unwrap());
    let router = setup_admin_router(AdminState::new(manager.clone(), KEY));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, manager)
}

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

#[tokio::test]
async fn test_requests_without_key_are_rejected() {
    let (addr, _) = serve().await;

    let res = client().get(format!("http://{addr}/admin/status")).send().await.unwrap();
    assert_eq!(res.status(), 401);

    let res = client()
        .get(format!("http://{addr}/admin/status"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);
}

#[tokio::test]
async fn test_status_and_session_report_metadata_only() {
    let (addr, manager) = serve().await;
    manager
        .store_tokens(&TokenPair::new("secret-access", "secret-refresh", 3600), None)
        .unwrap();

    let status: Value = client()
        .get(format!("http://{addr}/admin/status"))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "operational");
    assert_eq!(status["refreshing"], false);
    assert!(status["tab_id"].is_string());

    let res = client()
        .get(format!("http://{addr}/admin/session"))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body = res.text().await.unwrap();
    assert!(!body.contains("secret-access"));
    assert!(!body.contains("secret-refresh"));
    let session: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(session["hasRefreshToken"], true);
}

#[tokio::test]
async fn test_circuits_can_be_forced_open_and_closed() {
    let (addr, manager) = serve().await;

    let opened: Value = client()
        .post(format!("http://{addr}/admin/circuits/{REFRESH_SERVICE}/open"))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(opened["state"], "open");

    let status: Value = client()
        .get(format!("http://{addr}/admin/status"))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "degraded");

    let circuits: Vec<Value> = client()
        .get(format!("http://{addr}/admin/circuits"))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(circuits.iter().any(|c| c["service"] == REFRESH_SERVICE));

    let closed: Value = client()
        .post(format!("http://{addr}/admin/circuits/{REFRESH_SERVICE}/close"))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(closed["state"], "closed");
    assert!(manager.degradation_status().open_circuits.is_empty());
}

#[tokio::test]
async fn test_unknown_circuit_is_not_found() {
    let (addr, manager) = serve().await;

    for action in ["open", "close"] {
        let res = client()
            .post(format!("http://{addr}/admin/circuits/no-such-service/{action}"))
            .bearer_auth(KEY)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 404);
    }
    assert!(manager.breakers().find("no-such-service").is_none());
}

#[tokio::test]
async fn test_cache_report_counts_fallbacks() {
    let (addr, manager) = serve().await;
    manager.register_fallback("providers", &vec!["email"]).unwrap();

    let report: Value = client()
        .get(format!("http://{addr}/admin/cache"))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["stats"]["fallbacks"], 1);
    assert_eq!(report["degradation"]["degraded"], false);
}
