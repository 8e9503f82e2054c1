//! Retry logic.
//!
//! # Responsibilities
//! - Retry recoverable failures inline with exponential backoff + jitter
//! - Keep a table of deferred retries (key → next attempt, attempt count)
//!   that a single periodic tick evaluates
//!
//! # Design Decisions
//! - Only errors the caller classifies as retryable are retried
//! - Deferred retries never arm their own timers; whoever owns the tick asks
//!   the table what is due
//! - Jittered backoff prevents thundering herd

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use tokio::time::Instant;

use crate::config::RetryConfig;
use crate::resilience::backoff::BackoffPolicy;

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent.
pub async fn retry_with_backoff<T, E, F, Fut>(
    config: &RetryConfig,
    mut op: F,
    is_retryable: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = if config.enabled { config.max_attempts.max(1) } else { 1 };
    let policy = BackoffPolicy::from(config);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && is_retryable(&e) => {
                let delay = policy.delay(attempt);
                tracing::info!(attempt, delay = ?delay, error = %e, "Retrying operation");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// One row of the retry table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledRetry {
    pub attempts: u32,
    pub next_attempt: Instant,
}

/// Deferred retries keyed by an opaque name.
#[derive(Debug)]
pub struct RetrySchedule {
    policy: BackoffPolicy,
    entries: Mutex<HashMap<String, ScheduledRetry>>,
}

impl RetrySchedule {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure and return when the key may be attempted again.
    pub fn record_failure(&self, key: &str, now: Instant) -> Instant {
        let mut entries = self.lock();
        let attempts = entries.get(key).map_or(0, |e| e.attempts) + 1;
        let next_attempt = now + self.policy.delay(attempts);
        entries.insert(key.to_string(), ScheduledRetry { attempts, next_attempt });
        next_attempt
    }

    /// Forget a key after it succeeds.
    pub fn record_success(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Keys whose next attempt is at or before `now`.
    pub fn due(&self, now: Instant) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|(_, e)| e.next_attempt <= now)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Unknown keys are always due.
    pub fn is_due(&self, key: &str, now: Instant) -> bool {
        self.lock().get(key).map_or(true, |e| e.next_attempt <= now)
    }

    pub fn get(&self, key: &str) -> Option<ScheduledRetry> {
        self.lock().get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ScheduledRetry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
