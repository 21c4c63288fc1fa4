//! Persisted record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection state of an agent, as persisted and as reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Waiting for a pairing code to be scanned
    AwaitingQr,
    /// Transport connected, not logged in
    Connected,
    /// Logged in with a paired device
    Authenticated,
    Disconnected,
}

impl SessionState {
    /// Live state derived from a client's flags
    pub fn from_flags(connected: bool, authenticated: bool) -> Self {
        if authenticated {
            SessionState::Authenticated
        } else if connected {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::AwaitingQr => "awaiting_qr",
            SessionState::Connected => "connected",
            SessionState::Authenticated => "authenticated",
            SessionState::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One agent session owned by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user_id: String,
    pub agent_id: String,
    pub agent_name: String,
    /// Key presented to the AI backend; empty until adopted
    #[serde(default)]
    pub api_key: String,
    /// AI endpoint for this agent's runs
    pub endpoint_url_run: String,
    pub status: SessionState,
    #[serde(default)]
    pub last_connected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_disconnected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub user_id: String,
    pub access_token: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn new(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: access_token.into(),
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

/// Stored webhook destination; `agent_id` is `None` for the tenant default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRecord {
    #[serde(default)]
    pub agent_id: Option<String>,
    /// One URL, or several separated by commas
    pub url: String,
    #[serde(default)]
    pub secret: String,
    pub updated_at: DateTime<Utc>,
}
