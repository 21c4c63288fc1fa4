//! Persistence boundary for session records, API keys and webhook config
//!
//! The gateway only talks to the repository traits; [`JsonStore`] is the
//! bundled implementation.

mod json;
mod types;

pub use json::JsonStore;
pub use types::*;

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Session records keyed by `(user_id, agent_id)`
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert or replace the record with the same key
    async fn upsert(&self, record: SessionRecord) -> Result<()>;

    async fn find(&self, user_id: &str, agent_id: &str) -> Result<Option<SessionRecord>>;

    /// The record owning `agent_id`, whichever user it belongs to
    async fn find_by_agent(&self, agent_id: &str) -> Result<Option<SessionRecord>>;

    /// Returns whether a record was removed
    async fn delete(&self, user_id: &str, agent_id: &str) -> Result<bool>;

    async fn list(&self) -> Result<Vec<SessionRecord>>;
}

#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    async fn find_active_by_token(&self, token: &str) -> Result<Option<ApiKey>>;

    /// Most recently created active key of a user
    async fn find_active_by_user(&self, user_id: &str) -> Result<Option<ApiKey>>;

    async fn insert(&self, key: ApiKey) -> Result<()>;
}

#[async_trait]
pub trait WebhookConfigRepository: Send + Sync {
    async fn get_default(&self) -> Result<Option<WebhookRecord>>;

    async fn save_default(&self, record: WebhookRecord) -> Result<()>;

    async fn get_for_agent(&self, agent_id: &str) -> Result<Option<WebhookRecord>>;

    async fn save_for_agent(&self, record: WebhookRecord) -> Result<()>;
}

/// The repositories the gateway needs, usually backed by one store
#[derive(Clone)]
pub struct Repositories {
    pub sessions: Arc<dyn SessionRepository>,
    pub api_keys: Arc<dyn ApiKeyRepository>,
    pub webhooks: Arc<dyn WebhookConfigRepository>,
}

impl Repositories {
    /// Use one store for every repository
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: SessionRepository + ApiKeyRepository + WebhookConfigRepository + 'static,
    {
        Self {
            sessions: store.clone(),
            api_keys: store.clone(),
            webhooks: store,
        }
    }
}
