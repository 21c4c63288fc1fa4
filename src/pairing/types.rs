//! Pairing requests and responses

use crate::error::{Error, Result};
use crate::registry::CachedPairingCode;
use crate::store::SessionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request to create (or refresh) an agent session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub user_id: String,
    pub agent_id: String,
    pub agent_name: String,
    /// Defaults to the user's active key
    #[serde(default)]
    pub api_key: Option<String>,
    /// Defaults to the previously recorded endpoint, then the built-in one
    #[serde(default)]
    pub endpoint_url_run: Option<String>,
}

impl CreateSessionRequest {
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("user_id", &self.user_id),
            ("agent_id", &self.agent_id),
            ("agent_name", &self.agent_name),
        ] {
            if value.trim().is_empty() {
                return Err(Error::InvalidRequest(format!("{} is required", field)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub agent_id: String,
    pub is_ready: bool,
    pub session_state: SessionState,
    /// First pairing code, when the agent still has to be paired
    pub qr: Option<CachedPairingCode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Read-only view of an agent's connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub agent_id: String,
    pub is_ready: bool,
    pub has_connection: bool,
    pub session_state: SessionState,
    pub qr: Option<CachedPairingCode>,
}
