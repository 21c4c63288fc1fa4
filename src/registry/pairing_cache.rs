//! Most recent rendered pairing code per agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Rendered pairing code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedPairingCode {
    /// MIME type of the rendered image
    pub content_type: String,
    /// Base64 image data
    pub data: String,
    pub updated_at: DateTime<Utc>,
}

impl CachedPairingCode {
    pub fn png(data: String) -> Self {
        Self {
            content_type: "image/png".to_string(),
            data,
            updated_at: Utc::now(),
        }
    }

    /// `data:` URL suitable for an `<img>` tag
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.content_type, self.data)
    }

    /// Whether the code is younger than `max_age`
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.updated_at);
        age.to_std().map(|age| age <= max_age).unwrap_or(true)
    }
}

/// Shared map of agent id to its latest code
#[derive(Debug, Clone, Default)]
pub struct PairingCodeCache {
    codes: Arc<RwLock<HashMap<String, CachedPairingCode>>>,
}

impl PairingCodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the code for an agent
    pub async fn put(&self, agent_id: &str, code: CachedPairingCode) {
        self.codes.write().await.insert(agent_id.to_string(), code);
    }

    pub async fn get(&self, agent_id: &str) -> Option<CachedPairingCode> {
        self.codes.read().await.get(agent_id).cloned()
    }

    pub async fn clear(&self, agent_id: &str) {
        self.codes.write().await.remove(agent_id);
    }
}
