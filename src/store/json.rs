//! JSON file persistence for the repository traits
//!
//! Directory layout:
//! ```text
//! <records_dir>/
//! ├── sessions.json
//! ├── api_keys.json
//! └── webhooks.json
//! ```

use super::types::*;
use super::{ApiKeyRepository, SessionRepository, WebhookConfigRepository};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

const SESSIONS_FILE: &str = "sessions.json";
const API_KEYS_FILE: &str = "api_keys.json";
const WEBHOOKS_FILE: &str = "webhooks.json";

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct WebhookTable {
    #[serde(default)]
    default: Option<WebhookRecord>,
    #[serde(default)]
    agents: HashMap<String, WebhookRecord>,
}

/// In-memory record store, optionally mirrored to JSON files
pub struct JsonStore {
    dir: Option<PathBuf>,
    sessions: Arc<RwLock<Vec<SessionRecord>>>,
    api_keys: Arc<RwLock<Vec<ApiKey>>>,
    webhooks: Arc<RwLock<WebhookTable>>,
}

impl JsonStore {
    /// Open (or create) a store in `dir`
    pub async fn open(dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&dir).await?;

        let sessions = Self::load_file(&dir.join(SESSIONS_FILE)).await;
        let api_keys = Self::load_file(&dir.join(API_KEYS_FILE)).await;
        let webhooks = Self::load_file(&dir.join(WEBHOOKS_FILE)).await;

        Ok(Self {
            dir: Some(dir),
            sessions: Arc::new(RwLock::new(sessions)),
            api_keys: Arc::new(RwLock::new(api_keys)),
            webhooks: Arc::new(RwLock::new(webhooks)),
        })
    }

    /// Store that never touches the filesystem
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            sessions: Arc::new(RwLock::new(Vec::new())),
            api_keys: Arc::new(RwLock::new(Vec::new())),
            webhooks: Arc::new(RwLock::new(WebhookTable::default())),
        }
    }

    /// Directory the store persists to, if any
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    async fn load_file<T: DeserializeOwned + Default>(path: &Path) -> T {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to read {}: {}", path.display(), e);
                }
                return T::default();
            }
        };
        match serde_json::from_slice(&data) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Failed to parse {}: {}", path.display(), e);
                T::default()
            }
        }
    }

    async fn persist<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let path = dir.join(file);
        let tmp = dir.join(format!("{}.tmp", file));
        let json = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| Error::Store(format!("Failed to write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::Store(format!("Failed to replace {}: {}", path.display(), e)))?;
        Ok(())
    }
}

// =============================================================================
// Sessions
// =============================================================================

#[async_trait]
impl SessionRepository for JsonStore {
    async fn upsert(&self, record: SessionRecord) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let mut next = sessions.clone();
        match next
            .iter_mut()
            .find(|s| s.user_id == record.user_id && s.agent_id == record.agent_id)
        {
            Some(existing) => *existing = record,
            None => next.push(record),
        }
        self.persist(SESSIONS_FILE, &next).await?;
        *sessions = next;
        Ok(())
    }

    async fn find(&self, user_id: &str, agent_id: &str) -> Result<Option<SessionRecord>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .iter()
            .find(|s| s.user_id == user_id && s.agent_id == agent_id)
            .cloned())
    }

    async fn find_by_agent(&self, agent_id: &str) -> Result<Option<SessionRecord>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .iter()
            .filter(|s| s.agent_id == agent_id)
            .max_by_key(|s| s.updated_at)
            .cloned())
    }

    async fn delete(&self, user_id: &str, agent_id: &str) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        let mut next = sessions.clone();
        next.retain(|s| !(s.user_id == user_id && s.agent_id == agent_id));
        if next.len() == sessions.len() {
            return Ok(false);
        }
        self.persist(SESSIONS_FILE, &next).await?;
        *sessions = next;
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<SessionRecord>> {
        let mut sessions = self.sessions.read().await.clone();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }
}

// =============================================================================
// API keys
// =============================================================================

#[async_trait]
impl ApiKeyRepository for JsonStore {
    async fn find_active_by_token(&self, token: &str) -> Result<Option<ApiKey>> {
        let keys = self.api_keys.read().await;
        Ok(keys
            .iter()
            .find(|k| k.is_active && k.access_token == token)
            .cloned())
    }

    async fn find_active_by_user(&self, user_id: &str) -> Result<Option<ApiKey>> {
        let keys = self.api_keys.read().await;
        Ok(keys
            .iter()
            .filter(|k| k.is_active && k.user_id == user_id)
            .max_by_key(|k| k.created_at)
            .cloned())
    }

    async fn insert(&self, key: ApiKey) -> Result<()> {
        let mut keys = self.api_keys.write().await;
        if keys.iter().any(|k| k.access_token == key.access_token) {
            return Err(Error::InvalidRequest(
                "access token already exists".to_string(),
            ));
        }
        let mut next = keys.clone();
        next.push(key);
        self.persist(API_KEYS_FILE, &next).await?;
        *keys = next;
        Ok(())
    }
}

// =============================================================================
// Webhook config
// =============================================================================

#[async_trait]
impl WebhookConfigRepository for JsonStore {
    async fn get_default(&self) -> Result<Option<WebhookRecord>> {
        Ok(self.webhooks.read().await.default.clone())
    }

    async fn save_default(&self, mut record: WebhookRecord) -> Result<()> {
        record.agent_id = None;
        let mut table = self.webhooks.write().await;
        let mut next = table.clone();
        next.default = Some(record);
        self.persist(WEBHOOKS_FILE, &next).await?;
        *table = next;
        Ok(())
    }

    async fn get_for_agent(&self, agent_id: &str) -> Result<Option<WebhookRecord>> {
        Ok(self.webhooks.read().await.agents.get(agent_id).cloned())
    }

    async fn save_for_agent(&self, record: WebhookRecord) -> Result<()> {
        let agent_id = record
            .agent_id
            .clone()
            .ok_or_else(|| Error::InvalidRequest("agent id is required".to_string()))?;
        let mut table = self.webhooks.write().await;
        let mut next = table.clone();
        next.agents.insert(agent_id, record);
        self.persist(WEBHOOKS_FILE, &next).await?;
        *table = next;
        Ok(())
    }
}
