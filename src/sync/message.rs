//! Cross-tab wire format.
//!
//! JSON `{type, payload, timestamp, tabId}`. The payload shape depends on
//! the type; see the payload structs below.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::token::TokenPair;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncMessageType {
    Login,
    Logout,
    TokenRefresh,
    SessionExpired,
    ConflictResolution,
}

impl SyncMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMessageType::Login => "login",
            SyncMessageType::Logout => "logout",
            SyncMessageType::TokenRefresh => "token_refresh",
            SyncMessageType::SessionExpired => "session_expired",
            SyncMessageType::ConflictResolution => "conflict_resolution",
        }
    }
}

/// One message on the sync channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    #[serde(rename = "type")]
    pub kind: SyncMessageType,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Epoch milliseconds at the sender.
    pub timestamp: u64,
    /// Sender's tab id.
    pub tab_id: String,
}

impl SyncMessage {
    pub fn new(kind: SyncMessageType, payload: serde_json::Value, tab_id: &str, timestamp: u64) -> Self {
        Self {
            kind,
            payload,
            timestamp,
            tab_id: tab_id.to_string(),
        }
    }

    /// Decode the payload into the struct for this message type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

/// `LOGIN` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginPayload {
    pub tokens: TokenPair,
    #[serde(default)]
    pub user: Option<serde_json::Value>,
    /// Access token expiry, epoch milliseconds.
    pub expires_at: u64,
}

/// `TOKEN_REFRESH` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRefreshPayload {
    pub tokens: TokenPair,
    pub expires_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictAction {
    /// The addressed tab's login won; it keeps its session.
    KeepSession,
    /// The addressed tab's login lost; it takes the attached session.
    AdoptSession,
}

/// `CONFLICT_RESOLUTION` payload, addressed to a single tab.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolutionPayload {
    pub action: ConflictAction,
    pub target_tab_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenPair>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<serde_json::Value>,
}
