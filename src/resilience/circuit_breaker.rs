//! Circuit breaker for protected services.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: service assumed down, calls fail fast
//! - Half-Open: probing whether the service recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold (a success resets the count)
//! Open → Half-Open: first call at or after next_attempt
//! Half-Open → Closed: success_count >= success_threshold
//! Half-Open → Open: any classified failure
//! ```
//!
//! # Design Decisions
//! - One breaker per named service, created lazily by the manager
//! - Fail fast in Open state (the operation is never invoked)
//! - Every call runs under a hard timeout; a timeout is a failure
//! - Only errors that classify as service faults count; validation and
//!   authorization errors leave the breaker untouched

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::{BreakerSettings, CircuitBreakerConfig};
use crate::observability::metrics;
use crate::resilience::timeouts::with_deadline;

/// Decides whether an error reflects the health of the protected service.
pub trait Classify {
    /// True for network, server and provider faults.
    fn trips_breaker(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

/// Failure returned by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// Rejected without invoking the operation.
    #[error("circuit for {service} is open, retry in {retry_after:?}")]
    Open { service: String, retry_after: Duration },

    /// The operation exceeded the breaker's hard timeout.
    #[error("{service} did not respond within {after:?}")]
    Timeout { service: String, after: Duration },

    /// The operation itself failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> CircuitError<E> {
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitError::Inner(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    next_attempt: Option<Instant>,
}

/// Observability snapshot of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitMetrics {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub total_timeouts: u64,
    pub total_rejections: u64,
    pub average_response_time_ms: f64,
    pub last_failure_ago_ms: Option<u64>,
    pub next_attempt_in_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct Totals {
    requests: AtomicU64,
    failures: AtomicU64,
    successes: AtomicU64,
    timeouts: AtomicU64,
    rejections: AtomicU64,
    response_time_ms: AtomicU64,
    completed: AtomicU64,
}

/// Failure-state machine guarding one service.
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    settings: BreakerSettings,
    state: Mutex<BreakerState>,
    totals: Totals,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            service: service.into(),
            settings,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
                next_attempt: None,
            }),
            totals: Totals::default(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn settings(&self) -> BreakerSettings {
        self.settings
    }

    /// Run `operation` under the breaker's protection.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        self.totals.requests.fetch_add(1, Ordering::Relaxed);
        self.admit()?;

        let started = Instant::now();
        let outcome = with_deadline(self.settings.timeout(), operation()).await;
        self.record_latency(started.elapsed());

        match outcome {
            Ok(Ok(value)) => {
                self.on_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                if e.trips_breaker() {
                    self.on_failure();
                }
                Err(CircuitError::Inner(e))
            }
            Err(elapsed) => {
                self.totals.timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(service = %self.service, after = ?elapsed.0, "Protected call timed out");
                self.on_failure();
                Err(CircuitError::Timeout {
                    service: self.service.clone(),
                    after: elapsed.0,
                })
            }
        }
    }

    /// Current state. Open only becomes half-open when a call is attempted.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// True when a call made now would be rejected.
    pub fn is_open(&self) -> bool {
        let guard = self.lock();
        guard.state == CircuitState::Open
            && guard.next_attempt.is_some_and(|at| Instant::now() < at)
    }

    pub fn metrics(&self) -> CircuitMetrics {
        let guard = self.lock();
        let now = Instant::now();
        let completed = self.totals.completed.load(Ordering::Relaxed);
        let average = if completed == 0 {
            0.0
        } else {
            self.totals.response_time_ms.load(Ordering::Relaxed) as f64 / completed as f64
        };
        CircuitMetrics {
            service: self.service.clone(),
            state: guard.state,
            failure_count: guard.failure_count,
            success_count: guard.success_count,
            total_requests: self.totals.requests.load(Ordering::Relaxed),
            total_failures: self.totals.failures.load(Ordering::Relaxed),
            total_successes: self.totals.successes.load(Ordering::Relaxed),
            total_timeouts: self.totals.timeouts.load(Ordering::Relaxed),
            total_rejections: self.totals.rejections.load(Ordering::Relaxed),
            average_response_time_ms: average,
            last_failure_ago_ms: guard
                .last_failure
                .map(|t| now.saturating_duration_since(t).as_millis() as u64),
            next_attempt_in_ms: guard
                .next_attempt
                .map(|t| t.saturating_duration_since(now).as_millis() as u64),
        }
    }

    /// Manually open the circuit for one recovery period.
    pub fn force_open(&self) {
        let mut guard = self.lock();
        self.trip(&mut guard, Instant::now());
        tracing::warn!(service = %self.service, "Circuit forced open");
    }

    /// Manually close the circuit and reset its counters.
    pub fn force_close(&self) {
        let mut guard = self.lock();
        guard.state = CircuitState::Closed;
        guard.failure_count = 0;
        guard.success_count = 0;
        guard.next_attempt = None;
        metrics::record_circuit_state(&self.service, CircuitState::Closed);
        tracing::info!(service = %self.service, "Circuit forced closed");
    }

    fn admit<E>(&self) -> Result<(), CircuitError<E>> {
        let mut guard = self.lock();
        if guard.state != CircuitState::Open {
            return Ok(());
        }

        let now = Instant::now();
        match guard.next_attempt {
            Some(at) if now < at => {
                self.totals.rejections.fetch_add(1, Ordering::Relaxed);
                metrics::record_circuit_rejection(&self.service);
                Err(CircuitError::Open {
                    service: self.service.clone(),
                    retry_after: at - now,
                })
            }
            _ => {
                guard.state = CircuitState::HalfOpen;
                guard.success_count = 0;
                metrics::record_circuit_state(&self.service, CircuitState::HalfOpen);
                tracing::info!(service = %self.service, "Circuit half-open, probing");
                Ok(())
            }
        }
    }

    fn on_success(&self) {
        self.totals.successes.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.lock();
        match guard.state {
            CircuitState::Closed => guard.failure_count = 0,
            CircuitState::HalfOpen => {
                guard.success_count += 1;
                if guard.success_count >= self.settings.success_threshold {
                    guard.state = CircuitState::Closed;
                    guard.failure_count = 0;
                    guard.success_count = 0;
                    guard.next_attempt = None;
                    metrics::record_circuit_state(&self.service, CircuitState::Closed);
                    tracing::info!(service = %self.service, "Circuit closed, service recovered");
                }
            }
            // Forced open while the call was in flight; keep it open.
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        self.totals.failures.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut guard = self.lock();
        guard.last_failure = Some(now);
        match guard.state {
            CircuitState::Closed => {
                guard.failure_count += 1;
                if guard.failure_count >= self.settings.failure_threshold {
                    self.trip(&mut guard, now);
                    tracing::warn!(
                        service = %self.service,
                        failures = guard.failure_count,
                        "Circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                guard.failure_count += 1;
                self.trip(&mut guard, now);
                tracing::warn!(service = %self.service, "Probe failed, circuit reopened");
            }
            CircuitState::Open => {}
        }
    }

    fn trip(&self, guard: &mut BreakerState, now: Instant) {
        guard.state = CircuitState::Open;
        guard.success_count = 0;
        guard.next_attempt = Some(now + self.settings.recovery_timeout());
        metrics::record_circuit_state(&self.service, CircuitState::Open);
    }

    fn record_latency(&self, elapsed: Duration) {
        self.totals
            .response_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        self.totals.completed.fetch_add(1, Ordering::Relaxed);
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Keyed registry of breakers, one per service name.
#[derive(Debug)]
pub struct CircuitBreakerManager {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerManager {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Breaker for `service`, created with its configured settings on first use.
    pub fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(service, self.config.for_service(service))))
            .clone()
    }

    /// Existing breaker for `service`, if one was ever created.
    pub fn find(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(service).map(|r| r.value().clone())
    }

    /// Shorthand for `get(service).execute(operation)`.
    pub async fn execute<T, E, F, Fut>(&self, service: &str, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        self.get(service).execute(operation).await
    }

    /// Snapshots of every breaker created so far, sorted by service name.
    pub fn all_metrics(&self) -> Vec<CircuitMetrics> {
        let mut all: Vec<_> = self.breakers.iter().map(|r| r.value().metrics()).collect();
        all.sort_by(|a, b| a.service.cmp(&b.service));
        all
    }

    /// Services whose circuit currently rejects calls.
    pub fn open_circuits(&self) -> Vec<String> {
        self.breakers
            .iter()
            .filter(|r| r.value().is_open())
            .map(|r| r.key().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[derive(Debug)]
    enum TestError {
        Down,
        BadInput,
    }

    impl Classify for TestError {
        fn trips_breaker(&self) -> bool {
            matches!(self, TestError::Down)
        }
    }

    fn settings() -> BreakerSettings {
        BreakerSettings {
            failure_threshold: 3,
            success_threshold: 2,
            recovery_timeout_ms: 1_000,
            timeout_ms: 500,
        }
    }

    async fn fail(cb: &CircuitBreaker) {
        let _ = cb.execute(|| async { Err::<(), _>(TestError::Down) }).await;
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<u32, CircuitError<TestError>> {
        cb.execute(|| async { Ok::<_, TestError>(1) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_state_cycle() {
        let cb = CircuitBreaker::new("auth-service", settings());

        for _ in 0..3 {
            fail(&cb).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);

        // Rejected without invoking the operation.
        let invoked = AtomicU32::new(0);
        let result = cb
            .execute(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(())
            })
            .await;
        assert!(matches!(result, Err(CircuitError::Open { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(1_000)).await;

        assert!(succeed(&cb).await.is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(succeed(&cb).await.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new("token-refresh", settings());
        for _ in 0..3 {
            fail(&cb).await;
        }
        tokio::time::advance(Duration::from_millis(1_000)).await;

        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.is_open());
        assert!(cb.metrics().next_attempt_in_ms.unwrap() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::new("auth-service", settings());
        fail(&cb).await;
        fail(&cb).await;
        succeed(&cb).await.unwrap();
        fail(&cb).await;
        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().failure_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclassified_errors_do_not_trip() {
        let cb = CircuitBreaker::new("auth-service", settings());
        for _ in 0..10 {
            let result = cb.execute(|| async { Err::<(), _>(TestError::BadInput) }).await;
            assert!(matches!(result, Err(CircuitError::Inner(TestError::BadInput))));
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let cb = CircuitBreaker::new("auth-service", settings());
        for _ in 0..3 {
            let result = cb
                .execute(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, TestError>(())
                })
                .await;
            assert!(matches!(result, Err(CircuitError::Timeout { .. })));
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.metrics().total_timeouts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_override() {
        let cb = CircuitBreaker::new("auth-service", settings());
        cb.force_open();
        assert!(matches!(succeed(&cb).await, Err(CircuitError::Open { .. })));
        assert_eq!(cb.metrics().total_rejections, 1);

        cb.force_close();
        assert_eq!(succeed(&cb).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_manager_creates_breakers_lazily() {
        let mut config = CircuitBreakerConfig::default();
        config.services.insert("token-refresh".into(), settings());
        let manager = CircuitBreakerManager::new(config);

        assert!(manager.all_metrics().is_empty());
        assert!(manager.find("token-refresh").is_none());
        assert_eq!(manager.get("token-refresh").settings().failure_threshold, 3);
        assert_eq!(manager.get("auth-service").settings().failure_threshold, 5);
        assert!(Arc::ptr_eq(&manager.get("auth-service"), &manager.get("auth-service")));

        let names: Vec<_> = manager.all_metrics().into_iter().map(|m| m.service).collect();
        assert_eq!(names, vec!["auth-service", "token-refresh"]);
        assert!(manager.find("token-refresh").is_some());
    }
}
