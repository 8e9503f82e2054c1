//! Single-flight token refresh.
//!
//! At most one refresh call is in flight. Callers arriving while it runs are
//! queued and all receive the same outcome. The refresh itself runs on a
//! spawned task, so a caller that times out or is dropped abandons its wait
//! without cancelling the refresh for everyone else.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

use crate::config::RefreshConfig;
use crate::observability::metrics;
use crate::refresh::client::RefreshClient;
use crate::refresh::types::{RefreshError, SessionEvent};
use crate::resilience::timeouts::with_deadline;
use crate::token::TokenStore;

type Outcome = Result<String, RefreshError>;

struct Waiter {
    id: Uuid,
    tx: oneshot::Sender<Outcome>,
}

#[derive(Default)]
struct Flight {
    in_flight: bool,
    /// Leader first, then queued followers in arrival order.
    waiters: VecDeque<Waiter>,
}

struct Inner {
    store: Arc<TokenStore>,
    client: Arc<dyn RefreshClient>,
    config: RefreshConfig,
    flight: Mutex<Flight>,
    events: broadcast::Sender<SessionEvent>,
    refresh_calls: AtomicU64,
}

/// Result of asking to join a flight.
enum Joined {
    /// A flight settled while the caller was on its way in.
    Ready(String),
    Waiting(Ticket),
}

/// A caller's place in the current flight.
struct Ticket {
    id: Uuid,
    rx: oneshot::Receiver<Outcome>,
    leader: bool,
}

/// Serializes token refreshes and fans the result out to every waiter.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(store: Arc<TokenStore>, client: Arc<dyn RefreshClient>, config: RefreshConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                store,
                client,
                config,
                flight: Mutex::new(Flight::default()),
                events,
                refresh_calls: AtomicU64::new(0),
            }),
        }
    }

    /// A usable access token, refreshing first if the stored one is missing
    /// or inside the expiry buffer.
    pub async fn get_valid_access_token(&self) -> Result<String, RefreshError> {
        if let Some(token) = self.inner.store.access_token() {
            return Ok(token);
        }
        self.refresh(true).await
    }

    /// Refresh regardless of the current token's validity. Joins a refresh
    /// that is already running instead of starting another.
    pub async fn force_refresh(&self) -> Result<String, RefreshError> {
        self.refresh(false).await
    }

    /// Subscribe to refresh outcomes.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.lock().in_flight
    }

    /// Followers waiting on the in-flight refresh.
    pub fn queue_depth(&self) -> usize {
        self.inner.lock().waiters.len().saturating_sub(1)
    }

    /// Refresh calls made against the backend since startup.
    pub fn refresh_count(&self) -> u64 {
        self.inner.refresh_calls.load(Ordering::Relaxed)
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.inner.store
    }

    async fn refresh(&self, reuse_valid: bool) -> Result<String, RefreshError> {
        let ticket = match self.join(reuse_valid)? {
            Joined::Ready(token) => return Ok(token),
            Joined::Waiting(ticket) => ticket,
        };
        if ticket.leader {
            // Bounded by the request timeout inside the flight.
            return ticket.rx.await.unwrap_or(Err(RefreshError::Aborted));
        }

        let queue_timeout = self.inner.config.queue_timeout();
        match tokio::time::timeout(queue_timeout, ticket.rx).await {
            Ok(outcome) => outcome.unwrap_or(Err(RefreshError::Aborted)),
            Err(_) => {
                self.inner.lock().waiters.retain(|w| w.id != ticket.id);
                tracing::warn!(timeout = ?queue_timeout, "Gave up waiting for token refresh");
                metrics::record_refresh("queue_timeout");
                Err(RefreshError::QueueTimeout(queue_timeout))
            }
        }
    }

    /// Take a place in the running flight, or start one.
    ///
    /// With `reuse_valid`, the store is checked again under the flight lock so
    /// a caller that raced a settling flight does not start another.
    fn join(&self, reuse_valid: bool) -> Result<Joined, RefreshError> {
        let (tx, rx) = oneshot::channel();
        let id = Uuid::new_v4();
        let leader = {
            let mut flight = self.inner.lock();
            if flight.in_flight {
                let queued = flight.waiters.len().saturating_sub(1);
                if queued >= self.inner.config.queue_capacity {
                    tracing::warn!(queued, "Refresh queue full");
                    metrics::record_refresh("queue_full");
                    return Err(RefreshError::QueueFull(queued));
                }
                flight.waiters.push_back(Waiter { id, tx });
                metrics::record_refresh_queue_depth(queued + 1);
                false
            } else {
                if reuse_valid {
                    if let Some(token) = self.inner.store.access_token() {
                        return Ok(Joined::Ready(token));
                    }
                }
                flight.in_flight = true;
                flight.waiters.push_back(Waiter { id, tx });
                true
            }
        };

        if leader {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                let mut guard = FlightGuard { inner: &inner, done: false };
                let outcome = inner.run().await;
                guard.finish(outcome);
            });
        }

        Ok(Joined::Waiting(Ticket { id, rx, leader }))
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Flight> {
        self.flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run(&self) -> Outcome {
        let Some(refresh_token) = self.store.refresh_token() else {
            metrics::record_refresh("expired");
            if !self.store.has_held_session() {
                // Never signed in here; other tabs' sessions are not ours to end.
                tracing::debug!("No refresh token and no prior session");
                return Err(RefreshError::NoRefreshToken);
            }
            tracing::info!("No refresh token available, session expired");
            self.store.clear_tokens();
            let _ = self.events.send(SessionEvent::SessionExpired);
            return Err(RefreshError::NoRefreshToken);
        };

        self.refresh_calls.fetch_add(1, Ordering::Relaxed);
        let timeout = self.config.request_timeout();
        let result = match with_deadline(timeout, self.client.refresh(&refresh_token)).await {
            Ok(result) => result,
            Err(_) => Err(RefreshError::Timeout(timeout)),
        };

        match result {
            Ok(pair) => {
                if let Err(e) = self.store.store_tokens(&pair, None) {
                    tracing::error!(error = %e, "Failed to store refreshed tokens");
                    self.store.clear_tokens();
                    metrics::record_refresh("failure");
                    let error = RefreshError::Storage(e.to_string());
                    let _ = self.events.send(SessionEvent::RefreshFailed(error.clone()));
                    return Err(error);
                }
                tracing::info!("Access token refreshed");
                metrics::record_refresh("success");
                let access_token = pair.access_token.clone();
                let _ = self.events.send(SessionEvent::TokenRefreshed(pair));
                Ok(access_token)
            }
            Err(e @ RefreshError::Unavailable(_)) => {
                // Nothing was attempted, so the refresh token is still good.
                tracing::warn!(error = %e, "Refresh skipped, circuit open");
                metrics::record_refresh("rejected");
                Err(e)
            }
            Err(e) if e.is_terminal() => {
                tracing::info!("Refresh token rejected, session expired");
                self.store.clear_tokens();
                metrics::record_refresh("expired");
                let _ = self.events.send(SessionEvent::SessionExpired);
                Err(e)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh failed");
                self.store.clear_tokens();
                metrics::record_refresh("failure");
                let _ = self.events.send(SessionEvent::RefreshFailed(e.clone()));
                Err(e)
            }
        }
    }

    fn settle(&self, outcome: Outcome) {
        let waiters = {
            let mut flight = self.lock();
            flight.in_flight = false;
            std::mem::take(&mut flight.waiters)
        };
        tracing::debug!(waiters = waiters.len(), ok = outcome.is_ok(), "Settling refresh waiters");
        metrics::record_refresh_queue_depth(0);
        for waiter in waiters {
            let _ = waiter.tx.send(outcome.clone());
        }
    }
}

/// Releases the flight even if the refresh task panics.
struct FlightGuard<'a> {
    inner: &'a Inner,
    done: bool,
}

impl FlightGuard<'_> {
    fn finish(&mut self, outcome: Outcome) {
        self.done = true;
        self.inner.settle(outcome);
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.inner.settle(Err(RefreshError::Aborted));
        }
    }
}
