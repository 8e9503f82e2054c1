//! Keeps tabs of one origin on the same session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::config::SyncConfig;
use crate::observability::metrics;
use crate::refresh::{RefreshCoordinator, SessionEvent};
use crate::sync::channel::{SyncChannel, SyncError, Transport};
use crate::sync::message::{
    ConflictAction, ConflictResolutionPayload, LoginPayload, SyncMessage, SyncMessageType, TokenRefreshPayload,
};
use crate::token::{TokenPair, TokenStore};

/// Sends the user to the sign-in entry point.
pub trait Navigator: Send + Sync {
    fn redirect_to_sign_in(&self, path: &str);
}

/// Navigator for headless processes: records the redirect in the log.
#[derive(Debug, Default)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn redirect_to_sign_in(&self, path: &str) {
        tracing::info!(path, "Sign-in required");
    }
}

pub type MessageCallback = Arc<dyn Fn(&SyncMessage) + Send + Sync>;

type Listeners = Mutex<Vec<(u64, MessageCallback)>>;

/// Returned by [`CrossTabSynchronizer::add_message_listener`].
pub struct ListenerHandle {
    id: u64,
    listeners: Weak<Listeners>,
}

impl ListenerHandle {
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            lock(&listeners).retain(|(id, _)| *id != self.id);
        }
    }
}

/// Result of re-checking the session when the tab becomes visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityCheck {
    Valid,
    Refreshed,
    /// The refresh could not run, but the refresh token is still held.
    Degraded,
    Expired,
}

struct SyncInner {
    tab_id: String,
    config: SyncConfig,
    channel: Arc<dyn SyncChannel>,
    store: Arc<TokenStore>,
    coordinator: RefreshCoordinator,
    navigator: Arc<dyn Navigator>,
    clock: SharedClock,
    listeners: Arc<Listeners>,
    next_listener_id: AtomicU64,
}

/// Broadcasts local session changes and applies remote ones.
#[derive(Clone)]
pub struct CrossTabSynchronizer {
    inner: Arc<SyncInner>,
}

/// Fresh random tab id.
pub fn new_tab_id() -> String {
    Uuid::new_v4().to_string()
}

/// Login race rule: later expiry wins; on a tie the smaller tab id wins.
fn incoming_wins(incoming_expiry: u64, incoming_tab: &str, local_expiry: u64, local_tab: &str) -> bool {
    incoming_expiry > local_expiry || (incoming_expiry == local_expiry && incoming_tab < local_tab)
}

fn lock(listeners: &Listeners) -> MutexGuard<'_, Vec<(u64, MessageCallback)>> {
    listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CrossTabSynchronizer {
    pub fn new(
        tab_id: impl Into<String>,
        config: SyncConfig,
        channel: Arc<dyn SyncChannel>,
        coordinator: RefreshCoordinator,
        navigator: Arc<dyn Navigator>,
        clock: SharedClock,
    ) -> Self {
        let store = coordinator.store().clone();
        Self {
            inner: Arc::new(SyncInner {
                tab_id: tab_id.into(),
                config,
                channel,
                store,
                coordinator,
                navigator,
                clock,
                listeners: Arc::new(Mutex::new(Vec::new())),
                next_listener_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn tab_id(&self) -> &str {
        &self.inner.tab_id
    }

    pub fn transport(&self) -> Transport {
        self.inner.channel.transport()
    }

    pub fn broadcast_login(&self, tokens: &TokenPair, user: Option<serde_json::Value>) -> Result<(), SyncError> {
        let payload = LoginPayload {
            tokens: tokens.clone(),
            user,
            expires_at: self.inner.store.expiry_for(tokens),
        };
        self.post(SyncMessageType::Login, &payload)
    }

    pub fn broadcast_logout(&self) -> Result<(), SyncError> {
        self.post(SyncMessageType::Logout, &serde_json::json!({}))
    }

    pub fn broadcast_token_refresh(&self, tokens: &TokenPair) -> Result<(), SyncError> {
        let payload = TokenRefreshPayload {
            tokens: tokens.clone(),
            expires_at: self.inner.store.expiry_for(tokens),
        };
        self.post(SyncMessageType::TokenRefresh, &payload)
    }

    pub fn broadcast_session_expired(&self) -> Result<(), SyncError> {
        self.post(SyncMessageType::SessionExpired, &serde_json::json!({}))
    }

    /// Call `callback` for every message received from another tab.
    pub fn add_message_listener<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&SyncMessage) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.listeners).push((id, Arc::new(callback)));
        ListenerHandle {
            id,
            listeners: Arc::downgrade(&self.inner.listeners),
        }
    }

    /// Apply a message from the channel. Own messages are ignored.
    pub fn handle_message(&self, message: &SyncMessage) {
        if message.tab_id == self.inner.tab_id {
            return;
        }
        metrics::record_sync_message("received", message.kind.as_str());
        tracing::debug!(kind = ?message.kind, from = %message.tab_id, "Received sync message");

        let callbacks: Vec<MessageCallback> = lock(&self.inner.listeners)
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            callback(message);
        }

        let result = match message.kind {
            SyncMessageType::Login => self.on_login(message),
            SyncMessageType::TokenRefresh => self.on_token_refresh(message),
            SyncMessageType::ConflictResolution => self.on_conflict_resolution(message),
            SyncMessageType::Logout | SyncMessageType::SessionExpired => {
                self.end_session();
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, kind = ?message.kind, from = %message.tab_id, "Failed to apply sync message");
        }
    }

    /// Re-check the session after the tab comes back to the foreground.
    pub async fn on_visible(&self) -> VisibilityCheck {
        let store = &self.inner.store;
        if store.access_token().is_some() {
            return VisibilityCheck::Valid;
        }

        if store.refresh_token().is_some() {
            // Outcome events are rebroadcast by the relay loop.
            return match self.inner.coordinator.force_refresh().await {
                Ok(_) => VisibilityCheck::Refreshed,
                Err(e) if e.is_terminal() || store.refresh_token().is_none() => {
                    tracing::info!(error = %e, "Session could not be renewed on focus");
                    self.inner.navigator.redirect_to_sign_in(&self.inner.config.sign_in_path);
                    VisibilityCheck::Expired
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Refresh on focus deferred, session kept");
                    VisibilityCheck::Degraded
                }
            };
        }

        tracing::info!("No session on focus");
        let held = store.has_held_session();
        store.clear_tokens();
        if held {
            if let Err(e) = self.broadcast_session_expired() {
                tracing::warn!(error = %e, "Failed to broadcast session expiry");
            }
        }
        self.inner.navigator.redirect_to_sign_in(&self.inner.config.sign_in_path);
        VisibilityCheck::Expired
    }

    /// Listen to the channel and rebroadcast refresh outcomes until shutdown.
    ///
    /// The channel subscription is taken before this returns, so nothing
    /// posted afterwards is missed.
    pub fn spawn(&self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let mut listener = self.inner.channel.listen();
        let mut events = self.inner.coordinator.subscribe();
        let this = self.clone();

        tokio::spawn(async move {
            tracing::info!(tab_id = %this.inner.tab_id, "Cross-tab sync started");
            loop {
                tokio::select! {
                    message = listener.recv() => match message {
                        Some(message) => this.handle_message(&message),
                        None => {
                            tracing::warn!("Sync channel closed");
                            break;
                        }
                    },
                    event = events.recv() => match event {
                        Ok(event) => this.relay(event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Missed session events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown.recv() => {
                        tracing::info!("Cross-tab sync shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn relay(&self, event: SessionEvent) {
        let result = match event {
            SessionEvent::TokenRefreshed(pair) => self.broadcast_token_refresh(&pair),
            SessionEvent::SessionExpired | SessionEvent::RefreshFailed(_) => self.broadcast_session_expired(),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to relay session event");
        }
    }

    fn on_login(&self, message: &SyncMessage) -> Result<(), SyncError> {
        let payload: LoginPayload = message.payload_as()?;
        let store = &self.inner.store;

        if !store.is_access_token_valid() {
            tracing::info!(from = %message.tab_id, "Adopting login from another tab");
            store.store_tokens(&payload.tokens, payload.user)?;
            return Ok(());
        }

        let local_expiry = store.access_token_expiry().unwrap_or_default();
        if incoming_wins(payload.expires_at, &message.tab_id, local_expiry, &self.inner.tab_id) {
            tracing::info!(
                from = %message.tab_id,
                incoming_expiry = payload.expires_at,
                local_expiry,
                "Login conflict: replacing local session"
            );
            store.store_tokens(&payload.tokens, payload.user)?;
            self.post(
                SyncMessageType::ConflictResolution,
                &ConflictResolutionPayload {
                    action: ConflictAction::KeepSession,
                    target_tab_id: message.tab_id.clone(),
                    tokens: None,
                    user: None,
                },
            )
        } else {
            tracing::info!(
                from = %message.tab_id,
                incoming_expiry = payload.expires_at,
                local_expiry,
                "Login conflict: keeping local session"
            );
            let Some(tokens) = store.current_pair() else {
                return Ok(());
            };
            self.post(
                SyncMessageType::ConflictResolution,
                &ConflictResolutionPayload {
                    action: ConflictAction::AdoptSession,
                    target_tab_id: message.tab_id.clone(),
                    tokens: Some(tokens),
                    user: store.user(),
                },
            )
        }
    }

    fn on_conflict_resolution(&self, message: &SyncMessage) -> Result<(), SyncError> {
        let payload: ConflictResolutionPayload = message.payload_as()?;
        if payload.target_tab_id != self.inner.tab_id {
            return Ok(());
        }
        match (payload.action, payload.tokens) {
            (ConflictAction::KeepSession, _) => {
                tracing::debug!(from = %message.tab_id, "Login conflict resolved in our favour");
            }
            (ConflictAction::AdoptSession, Some(tokens)) => {
                tracing::info!(from = %message.tab_id, "Login conflict lost, adopting session");
                self.inner.store.store_tokens(&tokens, payload.user)?;
            }
            (ConflictAction::AdoptSession, None) => {
                tracing::warn!(from = %message.tab_id, "Adopt request without a session");
            }
        }
        Ok(())
    }

    fn on_token_refresh(&self, message: &SyncMessage) -> Result<(), SyncError> {
        let payload: TokenRefreshPayload = message.payload_as()?;
        let newer = self
            .inner
            .store
            .access_token_expiry()
            .map_or(true, |local| payload.expires_at > local);
        if newer {
            tracing::debug!(from = %message.tab_id, "Adopting refreshed tokens");
            self.inner.store.store_tokens(&payload.tokens, None)?;
        }
        Ok(())
    }

    fn end_session(&self) {
        self.inner.store.clear_tokens();
        self.inner.navigator.redirect_to_sign_in(&self.inner.config.sign_in_path);
    }

    fn post<P: Serialize>(&self, kind: SyncMessageType, payload: &P) -> Result<(), SyncError> {
        let message = SyncMessage::new(
            kind,
            serde_json::to_value(payload)?,
            &self.inner.tab_id,
            self.inner.clock.now_millis(),
        );
        self.inner.channel.post(&message)?;
        metrics::record_sync_message("sent", kind.as_str());
        tracing::debug!(kind = ?kind, "Broadcast sync message");
        Ok(())
    }
}
