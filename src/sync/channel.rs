//! Cross-tab transports.
//!
//! # Responsibilities
//! - Model what tabs of one origin share: an optional native broadcast
//!   channel, a key/value storage that raises change events and the
//!   domain-scoped cookie jar holding the refresh token
//! - Expose both behind one [`SyncChannel`] capability
//! - Pick the transport once, at construction
//!
//! # Design Decisions
//! - Both transports carry the same JSON text, so message semantics are
//!   identical whichever is selected
//! - The storage transport writes the message under the channel key and
//!   clears it immediately; only the write event carries a message
//! - Senders see their own messages; filtering by tab id is the
//!   synchronizer's job

use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::{SyncConfig, TransportPreference};
use crate::sync::message::SyncMessage;
use crate::token::{CookieJar, MemoryCookieJar, TokenError};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Broadcast,
    Storage,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Transport {0:?} is not available on this platform")]
    Unavailable(Transport),

    #[error("Invalid sync message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Failed to apply session from sync message: {0}")]
    Token(#[from] TokenError),
}

/// A change to shared storage, as seen by every tab of the origin.
#[derive(Debug, Clone)]
pub struct StorageEvent {
    pub key: String,
    pub new_value: Option<String>,
}

/// Origin-scoped key/value storage with change notifications.
#[derive(Debug, Clone)]
pub struct SharedStorage {
    items: Arc<DashMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
}

impl Default for SharedStorage {
    fn default() -> Self {
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            items: Arc::new(DashMap::new()),
            events,
        }
    }
}

impl SharedStorage {
    pub fn set_item(&self, key: &str, value: String) {
        self.items.insert(key.to_string(), value.clone());
        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
            new_value: Some(value),
        });
    }

    pub fn remove_item(&self, key: &str) {
        if self.items.remove(key).is_some() {
            let _ = self.events.send(StorageEvent {
                key: key.to_string(),
                new_value: None,
            });
        }
    }

    pub fn get_item(&self, key: &str) -> Option<String> {
        self.items.get(key).map(|v| v.value().clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}

/// Named native broadcast channels shared by an origin.
#[derive(Debug, Clone, Default)]
pub struct BroadcastHub {
    channels: Arc<DashMap<String, broadcast::Sender<String>>>,
}

impl BroadcastHub {
    fn sender(&self, name: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

/// What the tabs of one origin can reach.
#[derive(Debug, Clone)]
pub struct Origin {
    broadcast: Option<BroadcastHub>,
    storage: SharedStorage,
    cookies: Arc<dyn CookieJar>,
}

impl Default for Origin {
    fn default() -> Self {
        Self::new()
    }
}

impl Origin {
    /// A platform with native broadcast channels.
    pub fn new() -> Self {
        Self {
            broadcast: Some(BroadcastHub::default()),
            storage: SharedStorage::default(),
            cookies: Arc::new(MemoryCookieJar::new()),
        }
    }

    /// A platform with storage events only.
    pub fn storage_only() -> Self {
        Self {
            broadcast: None,
            storage: SharedStorage::default(),
            cookies: Arc::new(MemoryCookieJar::new()),
        }
    }

    /// Replace the origin's cookie jar, e.g. with a persistent one.
    pub fn with_cookies(mut self, cookies: Arc<dyn CookieJar>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn has_broadcast(&self) -> bool {
        self.broadcast.is_some()
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    /// Cookies are domain-scoped: every tab sees the same jar.
    pub fn cookies(&self) -> &Arc<dyn CookieJar> {
        &self.cookies
    }
}

/// Sends and receives sync messages for one tab.
pub trait SyncChannel: Send + Sync {
    fn transport(&self) -> Transport;

    fn post(&self, message: &SyncMessage) -> Result<(), SyncError>;

    /// A receiver for messages posted after this call.
    fn listen(&self) -> Box<dyn SyncListener>;
}

pub trait SyncListener: Send {
    /// Next message; `None` once the channel is gone.
    fn recv(&mut self) -> BoxFuture<'_, Option<SyncMessage>>;
}

/// Open the channel named in `config` on the best transport `origin` offers.
pub fn open_channel(origin: &Origin, config: &SyncConfig) -> Result<Arc<dyn SyncChannel>, SyncError> {
    let name = config.channel_name.as_str();
    let channel: Arc<dyn SyncChannel> = match (config.transport, &origin.broadcast) {
        (TransportPreference::Auto | TransportPreference::Broadcast, Some(hub)) => {
            Arc::new(BroadcastSyncChannel::new(hub, name))
        }
        (TransportPreference::Broadcast, None) => return Err(SyncError::Unavailable(Transport::Broadcast)),
        (TransportPreference::Auto, None) | (TransportPreference::Storage, _) => {
            Arc::new(StorageSyncChannel::new(&origin.storage, name))
        }
    };
    tracing::info!(channel = %name, transport = ?channel.transport(), "Opened sync channel");
    Ok(channel)
}

fn decode(raw: &str) -> Option<SyncMessage> {
    match serde_json::from_str(raw) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::warn!(error = %e, "Discarding malformed sync message");
            None
        }
    }
}

/// Native broadcast channel transport.
pub struct BroadcastSyncChannel {
    sender: broadcast::Sender<String>,
}

impl BroadcastSyncChannel {
    pub fn new(hub: &BroadcastHub, name: &str) -> Self {
        Self { sender: hub.sender(name) }
    }
}

impl SyncChannel for BroadcastSyncChannel {
    fn transport(&self) -> Transport {
        Transport::Broadcast
    }

    fn post(&self, message: &SyncMessage) -> Result<(), SyncError> {
        let raw = serde_json::to_string(message)?;
        // No receivers just means no other tab is open.
        let _ = self.sender.send(raw);
        Ok(())
    }

    fn listen(&self) -> Box<dyn SyncListener> {
        Box::new(BroadcastListener {
            rx: self.sender.subscribe(),
        })
    }
}

struct BroadcastListener {
    rx: broadcast::Receiver<String>,
}

impl SyncListener for BroadcastListener {
    fn recv(&mut self) -> BoxFuture<'_, Option<SyncMessage>> {
        Box::pin(async move {
            loop {
                match self.rx.recv().await {
                    Ok(raw) => {
                        if let Some(message) = decode(&raw) {
                            return Some(message);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Sync listener lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }
}

/// Storage-event transport for platforms without broadcast channels.
pub struct StorageSyncChannel {
    storage: SharedStorage,
    key: String,
}

impl StorageSyncChannel {
    pub fn new(storage: &SharedStorage, name: &str) -> Self {
        Self {
            storage: storage.clone(),
            key: name.to_string(),
        }
    }
}

impl SyncChannel for StorageSyncChannel {
    fn transport(&self) -> Transport {
        Transport::Storage
    }

    fn post(&self, message: &SyncMessage) -> Result<(), SyncError> {
        let raw = serde_json::to_string(message)?;
        self.storage.set_item(&self.key, raw);
        self.storage.remove_item(&self.key);
        Ok(())
    }

    fn listen(&self) -> Box<dyn SyncListener> {
        Box::new(StorageListener {
            rx: self.storage.subscribe(),
            key: self.key.clone(),
        })
    }
}

struct StorageListener {
    rx: broadcast::Receiver<StorageEvent>,
    key: String,
}

impl SyncListener for StorageListener {
    fn recv(&mut self) -> BoxFuture<'_, Option<SyncMessage>> {
        Box::pin(async move {
            loop {
                match self.rx.recv().await {
                    Ok(StorageEvent { key, new_value: Some(raw) }) if key == self.key => {
                        if let Some(message) = decode(&raw) {
                            return Some(message);
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Storage listener lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::message::SyncMessageType;

    fn message(tab: &str) -> SyncMessage {
        SyncMessage::new(SyncMessageType::Logout, serde_json::Value::Null, tab, 1)
    }

    fn config(transport: TransportPreference) -> SyncConfig {
        SyncConfig {
            transport,
            ..SyncConfig::default()
        }
    }

    #[test]
    fn test_transport_selection() {
        let full = Origin::new();
        let limited = Origin::storage_only();

        let auto = open_channel(&full, &config(TransportPreference::Auto)).unwrap();
        assert_eq!(auto.transport(), Transport::Broadcast);

        let fallback = open_channel(&limited, &config(TransportPreference::Auto)).unwrap();
        assert_eq!(fallback.transport(), Transport::Storage);

        let forced = open_channel(&full, &config(TransportPreference::Storage)).unwrap();
        assert_eq!(forced.transport(), Transport::Storage);

        assert!(matches!(
            open_channel(&limited, &config(TransportPreference::Broadcast)),
            Err(SyncError::Unavailable(Transport::Broadcast))
        ));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_other_tabs() {
        let origin = Origin::new();
        let a = open_channel(&origin, &SyncConfig::default()).unwrap();
        let b = open_channel(&origin, &SyncConfig::default()).unwrap();
        let mut listener = b.listen();

        a.post(&message("a")).unwrap();
        assert_eq!(listener.recv().await.unwrap().tab_id, "a");
    }

    #[tokio::test]
    async fn test_storage_write_is_cleared_and_delivered_once() {
        let origin = Origin::storage_only();
        let a = open_channel(&origin, &SyncConfig::default()).unwrap();
        let b = open_channel(&origin, &SyncConfig::default()).unwrap();
        let mut listener = b.listen();

        a.post(&message("a")).unwrap();
        a.post(&message("a2")).unwrap();

        assert_eq!(listener.recv().await.unwrap().tab_id, "a");
        assert_eq!(listener.recv().await.unwrap().tab_id, "a2");
        assert!(origin.storage().get_item("auth-session-sync").is_none());
    }

    #[tokio::test]
    async fn test_channels_are_isolated_by_name() {
        let origin = Origin::new();
        let app = open_channel(&origin, &SyncConfig::default()).unwrap();
        let other = open_channel(
            &origin,
            &SyncConfig {
                channel_name: "other-app".into(),
                ..SyncConfig::default()
            },
        )
        .unwrap();
        let mut listener = app.listen();

        other.post(&message("x")).unwrap();
        app.post(&message("y")).unwrap();
        assert_eq!(listener.recv().await.unwrap().tab_id, "y");
    }

    #[tokio::test]
    async fn test_malformed_storage_value_is_skipped() {
        let origin = Origin::storage_only();
        let channel = open_channel(&origin, &SyncConfig::default()).unwrap();
        let mut listener = channel.listen();

        origin.storage().set_item("auth-session-sync", "not json".into());
        channel.post(&message("ok")).unwrap();
        assert_eq!(listener.recv().await.unwrap().tab_id, "ok");
    }
}
