//! Administration of stored webhook destinations

use super::resolver::ConfigWebhookResolver;
use crate::error::{Error, Result};
use crate::store::{SessionRepository, WebhookConfigRepository, WebhookRecord};
use chrono::Utc;
use std::sync::Arc;

pub struct WebhookConfigService {
    repo: Arc<dyn WebhookConfigRepository>,
    sessions: Arc<dyn SessionRepository>,
    resolver: Arc<ConfigWebhookResolver>,
}

impl WebhookConfigService {
    pub fn new(
        repo: Arc<dyn WebhookConfigRepository>,
        sessions: Arc<dyn SessionRepository>,
        resolver: Arc<ConfigWebhookResolver>,
    ) -> Self {
        Self {
            repo,
            sessions,
            resolver,
        }
    }

    pub async fn get_default(&self) -> Result<Option<WebhookRecord>> {
        self.repo.get_default().await
    }

    /// Set the tenant-wide destination
    pub async fn save_default(&self, url: &str, secret: &str) -> Result<WebhookRecord> {
        let record = WebhookRecord {
            agent_id: None,
            url: required_url(url)?,
            secret: secret.trim().to_string(),
            updated_at: Utc::now(),
        };
        self.repo.save_default(record.clone()).await?;
        self.resolver.invalidate(None).await;
        tracing::info!("Default webhook updated");
        Ok(record)
    }

    pub async fn get_for_agent(&self, agent_id: &str) -> Result<Option<WebhookRecord>> {
        self.repo.get_for_agent(agent_id).await
    }

    /// Set an agent's destination; the agent must have a session
    pub async fn save_for_agent(
        &self,
        agent_id: &str,
        url: &str,
        secret: &str,
    ) -> Result<WebhookRecord> {
        let url = required_url(url)?;
        if self.sessions.find_by_agent(agent_id).await?.is_none() {
            return Err(Error::SessionNotFound(agent_id.to_string()));
        }

        let record = WebhookRecord {
            agent_id: Some(agent_id.to_string()),
            url,
            secret: secret.trim().to_string(),
            updated_at: Utc::now(),
        };
        self.repo.save_for_agent(record.clone()).await?;
        self.resolver.invalidate(Some(agent_id)).await;
        tracing::info!(agent = %agent_id, "Agent webhook updated");
        Ok(record)
    }
}

fn required_url(url: &str) -> Result<String> {
    let url = url.trim();
    if url.is_empty() {
        return Err(Error::InvalidRequest("url is required".to_string()));
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{JsonStore, SessionRecord, SessionState};
    use crate::webhook::{WebhookResolver, WebhookTargets};
    use std::time::Duration;

    fn service(store: Arc<JsonStore>) -> (WebhookConfigService, Arc<ConfigWebhookResolver>) {
        let resolver = Arc::new(ConfigWebhookResolver::new(
            store.clone(),
            WebhookTargets::default(),
            Duration::from_secs(60),
        ));
        (
            WebhookConfigService::new(store.clone(), store, resolver.clone()),
            resolver,
        )
    }

    async fn seed_session(store: &JsonStore, agent_id: &str) {
        let now = Utc::now();
        store
            .upsert(SessionRecord {
                user_id: "user-1".into(),
                agent_id: agent_id.into(),
                agent_name: "Bot".into(),
                api_key: String::new(),
                endpoint_url_run: String::new(),
                status: SessionState::Authenticated,
                last_connected_at: None,
                last_disconnected_at: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_save_for_agent_requires_session() {
        let store = Arc::new(JsonStore::in_memory());
        let (service, _) = service(store);
        assert!(matches!(
            service
                .save_for_agent("agent-a", "https://a.example.com", "")
                .await,
            Err(Error::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_url_is_required() {
        let store = Arc::new(JsonStore::in_memory());
        let (service, _) = service(store);
        assert!(matches!(
            service.save_default("   ", "s").await,
            Err(Error::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_saving_invalidates_resolver_cache() {
        let store = Arc::new(JsonStore::in_memory());
        seed_session(&store, "agent-a").await;
        let (service, resolver) = service(store);

        assert!(resolver.resolve("agent-a").await.unwrap().urls.is_empty());

        service
            .save_for_agent("agent-a", " https://a.example.com ", " s ")
            .await
            .unwrap();
        let targets = resolver.resolve("agent-a").await.unwrap();
        assert_eq!(targets.urls, vec!["https://a.example.com"]);
        assert_eq!(targets.secret, "s");

        service
            .save_default("https://tenant.example.com", "t")
            .await
            .unwrap();
        assert_eq!(
            resolver.resolve("agent-b").await.unwrap().urls,
            vec!["https://tenant.example.com"]
        );
        assert!(service.get_default().await.unwrap().is_some());
        assert!(service.get_for_agent("agent-a").await.unwrap().is_some());
    }
}
