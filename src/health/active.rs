//! Active health checking.
//!
//! # Responsibilities
//! - Hold the registered probe per service
//! - Probe services when due and update their state
//! - Force the paired circuit open while a service is unhealthy
//!
//! A single tick drives everything. Healthy services are due every
//! `interval_secs`; failing services are due when the retry table says so,
//! which backs off from one tick up to the regular interval.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::{join_all, BoxFuture};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::config::HealthCheckConfig;
use crate::health::state::{HealthReport, HealthStatus, ServiceHealth};
use crate::observability::metrics;
use crate::resilience::backoff::BackoffPolicy;
use crate::resilience::timeouts::with_deadline;
use crate::resilience::{CircuitBreakerManager, RetrySchedule};

/// An externally supplied liveness probe.
pub trait HealthCheck: Send + Sync {
    fn check(&self) -> BoxFuture<'_, HealthReport>;
}

impl<F> HealthCheck for F
where
    F: Fn() -> BoxFuture<'static, HealthReport> + Send + Sync,
{
    fn check(&self) -> BoxFuture<'_, HealthReport> {
        self()
    }
}

/// Probe that GETs a URL and expects a 2xx.
pub struct HttpHealthCheck {
    http: reqwest::Client,
    url: url::Url,
}

impl HttpHealthCheck {
    pub fn new(url: url::Url, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("session-engine-health-check")
            .build()
            .unwrap_or_default();
        Self { http, url }
    }
}

impl HealthCheck for HttpHealthCheck {
    fn check(&self) -> BoxFuture<'_, HealthReport> {
        Box::pin(async move {
            let started = Instant::now();
            match self.http.get(self.url.clone()).send().await {
                Ok(response) if response.status().is_success() => HealthReport::healthy(started.elapsed()),
                Ok(response) => HealthReport::unhealthy(started.elapsed(), format!("status {}", response.status())),
                Err(e) => HealthReport::unhealthy(started.elapsed(), e.to_string()),
            }
        })
    }
}

/// Diagnostics view of one monitored service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealthSnapshot {
    pub service: String,
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_checks: u64,
    pub failed_probes: u32,
    pub last_response_time_ms: Option<u64>,
    pub last_details: Option<String>,
}

pub struct HealthMonitor {
    config: HealthCheckConfig,
    breakers: Arc<CircuitBreakerManager>,
    checks: DashMap<String, Arc<dyn HealthCheck>>,
    states: DashMap<String, ServiceHealth>,
    retries: RetrySchedule,
}

impl HealthMonitor {
    pub fn new(config: HealthCheckConfig, breakers: Arc<CircuitBreakerManager>) -> Self {
        let retries = RetrySchedule::new(BackoffPolicy {
            base_ms: config.tick_ms.max(1),
            max_ms: config.interval_secs.saturating_mul(1000).max(config.tick_ms),
        });
        Self {
            config,
            breakers,
            checks: DashMap::new(),
            states: DashMap::new(),
            retries,
        }
    }

    /// Monitor `service` with `check`. The first probe runs on the next tick.
    pub fn register(&self, service: &str, check: Arc<dyn HealthCheck>) {
        tracing::info!(service, "Registered health check");
        self.checks.insert(service.to_string(), check);
        self.states.insert(service.to_string(), ServiceHealth::new(Instant::now()));
    }

    pub fn unregister(&self, service: &str) {
        self.checks.remove(service);
        self.states.remove(service);
        self.retries.record_success(service);
    }

    /// Unknown services count as healthy.
    pub fn is_healthy(&self, service: &str) -> bool {
        self.states
            .get(service)
            .map_or(true, |s| s.status == HealthStatus::Healthy)
    }

    pub fn snapshot(&self) -> Vec<ServiceHealthSnapshot> {
        let mut all: Vec<_> = self
            .states
            .iter()
            .map(|entry| {
                let state = entry.value();
                ServiceHealthSnapshot {
                    service: entry.key().clone(),
                    status: state.status,
                    consecutive_failures: state.consecutive_failures,
                    consecutive_successes: state.consecutive_successes,
                    total_checks: state.total_checks,
                    failed_probes: self.retries.get(entry.key()).map_or(0, |r| r.attempts),
                    last_response_time_ms: state
                        .last_report
                        .as_ref()
                        .map(|r| r.response_time.as_millis() as u64),
                    last_details: state.last_report.as_ref().and_then(|r| r.details.clone()),
                }
            })
            .collect();
        all.sort_by(|a, b| a.service.cmp(&b.service));
        all
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            tick_ms = self.config.tick_ms,
            services = self.checks.len(),
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_millis(self.config.tick_ms.max(1)));
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every service that is due and apply the results.
    pub async fn tick(&self) {
        let now = Instant::now();
        let due: Vec<(String, Arc<dyn HealthCheck>)> = self
            .checks
            .iter()
            .filter(|entry| self.is_due(entry.key(), now))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        if due.is_empty() {
            return;
        }

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let probes = due.into_iter().map(|(service, check)| async move {
            let started = Instant::now();
            let report = match with_deadline(timeout, check.check()).await {
                Ok(report) => report,
                Err(_) => HealthReport::unhealthy(started.elapsed(), format!("timed out after {timeout:?}")),
            };
            (service, report)
        });

        for (service, report) in join_all(probes).await {
            self.apply(&service, report, Instant::now());
        }
    }

    fn is_due(&self, service: &str, now: Instant) -> bool {
        if self.retries.get(service).is_some() {
            return self.retries.is_due(service, now);
        }
        self.states.get(service).map_or(true, |s| s.next_probe <= now)
    }

    fn apply(&self, service: &str, report: HealthReport, now: Instant) {
        if !report.healthy {
            tracing::warn!(
                service,
                details = report.details.as_deref().unwrap_or(""),
                "Health check failed"
            );
        }

        let healthy = report.healthy;
        let transition = {
            let Some(mut state) = self.states.get_mut(service) else {
                return;
            };
            let transition = state.record(
                report,
                now,
                self.config.healthy_threshold,
                self.config.unhealthy_threshold,
            );
            state.next_probe = now + Duration::from_secs(self.config.interval_secs);
            (transition, state.status)
        };
        let (transition, status) = transition;

        if healthy {
            self.retries.record_success(service);
        } else {
            let next = self.retries.record_failure(service, now);
            tracing::debug!(service, retry_in = ?next.saturating_duration_since(now), "Scheduled health re-probe");
        }

        match transition {
            Some(HealthStatus::Unhealthy) => {
                tracing::warn!(service, "Service marked unhealthy, opening circuit");
                self.breakers.get(service).force_open();
            }
            Some(HealthStatus::Healthy) => {
                tracing::info!(service, "Service recovered, closing circuit");
                self.breakers.get(service).force_close();
            }
            None if !healthy && status == HealthStatus::Unhealthy => {
                // Keep the circuit shut while the service stays down.
                let breaker = self.breakers.get(service);
                if !breaker.is_open() {
                    tracing::debug!(service, "Service still unhealthy, re-opening circuit");
                    breaker.force_open();
                }
            }
            None => {}
        }
        metrics::record_service_health(service, self.is_healthy(service));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use crate::config::CircuitBreakerConfig;
    use crate::resilience::CircuitState;

    struct Switch {
        up: AtomicBool,
        probes: AtomicU32,
    }

    impl Switch {
        fn new(up: bool) -> Arc<Self> {
            Arc::new(Self {
                up: AtomicBool::new(up),
                probes: AtomicU32::new(0),
            })
        }
    }

    impl HealthCheck for Switch {
        fn check(&self) -> BoxFuture<'_, HealthReport> {
            Box::pin(async move {
                self.probes.fetch_add(1, Ordering::SeqCst);
                if self.up.load(Ordering::SeqCst) {
                    HealthReport::healthy(Duration::from_millis(3))
                } else {
                    HealthReport::unhealthy(Duration::from_millis(3), "connection refused")
                }
            })
        }
    }

    fn config() -> HealthCheckConfig {
        HealthCheckConfig {
            interval_secs: 30,
            timeout_secs: 1,
            tick_ms: 100,
            unhealthy_threshold: 2,
            healthy_threshold: 2,
            ..HealthCheckConfig::default()
        }
    }

    fn monitor() -> (HealthMonitor, Arc<CircuitBreakerManager>) {
        let breakers = Arc::new(CircuitBreakerManager::new(CircuitBreakerConfig::default()));
        (HealthMonitor::new(config(), breakers.clone()), breakers)
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_service_probed_on_interval() {
        let (monitor, _) = monitor();
        let check = Switch::new(true);
        monitor.register("auth-service", check.clone());

        monitor.tick().await;
        monitor.tick().await;
        assert_eq!(check.probes.load(Ordering::SeqCst), 1);

        time::advance(Duration::from_secs(30)).await;
        monitor.tick().await;
        assert_eq!(check.probes.load(Ordering::SeqCst), 2);
        assert!(monitor.is_healthy("auth-service"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhealthy_service_forces_circuit_open_then_closed() {
        let (monitor, breakers) = monitor();
        let check = Switch::new(false);
        monitor.register("token-refresh", check.clone());

        monitor.tick().await;
        assert!(monitor.is_healthy("token-refresh"));

        // Failing services are re-probed on the retry table, well before the interval.
        time::advance(Duration::from_millis(300)).await;
        monitor.tick().await;
        assert!(!monitor.is_healthy("token-refresh"));
        assert_eq!(breakers.get("token-refresh").state(), CircuitState::Open);

        check.up.store(true, Ordering::SeqCst);
        time::advance(Duration::from_secs(1)).await;
        monitor.tick().await;
        time::advance(Duration::from_secs(30)).await;
        monitor.tick().await;

        assert!(monitor.is_healthy("token-refresh"));
        assert_eq!(breakers.get("token-refresh").state(), CircuitState::Closed);
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot[0].failed_probes, 0);
        assert_eq!(snapshot[0].total_checks, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_check_reopens_circuit_while_unhealthy() {
        let (monitor, breakers) = monitor();
        let check = Switch::new(false);
        monitor.register("token-refresh", check.clone());

        monitor.tick().await;
        time::advance(Duration::from_millis(300)).await;
        monitor.tick().await;
        assert!(!monitor.is_healthy("token-refresh"));

        breakers.get("token-refresh").force_close();
        time::advance(Duration::from_secs(1)).await;
        monitor.tick().await;

        assert!(check.probes.load(Ordering::SeqCst) >= 3);
        assert!(!monitor.is_healthy("token-refresh"));
        assert_eq!(breakers.get("token-refresh").state(), CircuitState::Open);

        // Outlasting the recovery period does not let calls through.
        time::advance(Duration::from_secs(120)).await;
        monitor.tick().await;
        assert!(breakers.get("token-refresh").is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_counts_as_failure() {
        let (monitor, _) = monitor();
        let slow = || -> BoxFuture<'static, HealthReport> {
            Box::pin(async {
                time::sleep(Duration::from_secs(5)).await;
                HealthReport::healthy(Duration::from_secs(5))
            })
        };
        monitor.register("auth-service", Arc::new(slow));

        monitor.tick().await;
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot[0].consecutive_failures, 1);
        assert!(snapshot[0].last_details.as_deref().unwrap().contains("timed out"));
        assert_eq!(snapshot[0].failed_probes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_service_is_healthy() {
        let (monitor, _) = monitor();
        assert!(monitor.is_healthy("never-registered"));
        monitor.register("x", Switch::new(true));
        monitor.unregister("x");
        assert!(monitor.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let (monitor, _) = monitor();
        let check = Switch::new(true);
        monitor.register("auth-service", check.clone());
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(Arc::new(monitor).run(rx));
        time::sleep(Duration::from_millis(250)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(check.probes.load(Ordering::SeqCst), 1);
    }
}
