//! Degraded reads against a backend that goes away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use session_engine::lifecycle::startup::build_manager;
use session_engine::session::ErrorKind;
use session_engine::sync::Origin;
use session_engine::{DataSource, DegradationOptions, SessionError};

mod common;
use common::{engine_config, start_programmable_backend};

async fn fetch_providers(client: &reqwest::Client, url: &str) -> Result<Vec<String>, SessionError> {
    let res = client
        .get(url)
        .send()
        .await
        .map_err(|e| SessionError::network(e.to_string()))?;
    let status = res.status();
    if !status.is_success() {
        return Err(SessionError::from_status(status.as_u16(), "providers request failed"));
    }
    res.json().await.map_err(|e| SessionError::server(502, e.to_string()))
}

#[tokio::test]
async fn test_sources_follow_backend_availability() {
    let down = Arc::new(AtomicBool::new(false));
    let flag = down.clone();
    let addr = start_programmable_backend(move |_| {
        let down = flag.load(Ordering::SeqCst);
        async move {
            if down {
                (503, "{}".to_string())
            } else {
                (200, r#"["google","github"]"#.to_string())
            }
        }
    })
    .await;

    let mut config = engine_config("http://127.0.0.1:9");
    config.retries.max_attempts = 2;
    let manager = build_manager(&config, &Origin::new()).unwrap();
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let url = format!("http://{addr}/auth/providers");
    let options = || DegradationOptions::<Vec<String>>::new("providers", "auth-service");

    let live = manager
        .execute_with_degradation(|| fetch_providers(&client, &url), options())
        .await
        .unwrap();
    assert_eq!(live.source, DataSource::Live);
    assert_eq!(live.data, vec!["google".to_string(), "github".to_string()]);

    down.store(true, Ordering::SeqCst);
    let cached = manager
        .execute_with_degradation(|| fetch_providers(&client, &url), options())
        .await
        .unwrap();
    assert_eq!(cached.source, DataSource::Cache);
    assert_eq!(cached.data, live.data);

    let fallback = manager
        .execute_with_degradation(
            || fetch_providers(&client, &url),
            DegradationOptions::new("providers-v2", "auth-service").with_fallback(vec!["email".to_string()]),
        )
        .await
        .unwrap();
    assert_eq!(fallback.source, DataSource::Fallback);
    assert!(fallback.is_degraded());
}

#[tokio::test]
async fn test_client_errors_pass_through() {
    let addr = start_programmable_backend(|_| async { (404, "{}".to_string()) }).await;
    let manager = build_manager(&engine_config("http://127.0.0.1:9"), &Origin::new()).unwrap();
    manager.register_fallback("profile", &vec!["guest".to_string()]).unwrap();
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let url = format!("http://{addr}/profile");

    let error = manager
        .execute_with_degradation(
            || fetch_providers(&client, &url),
            DegradationOptions::new("profile", "profile-service"),
        )
        .await
        .unwrap_err();
    assert_eq!(error.kind, ErrorKind::Validation);
    assert_eq!(error.status, Some(404));
}
