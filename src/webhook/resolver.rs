//! Webhook target resolution: agent config, then tenant default, then the
//! static configuration

use super::WebhookTargets;
use crate::config::split_list;
use crate::error::Result;
use crate::store::{WebhookConfigRepository, WebhookRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[async_trait]
pub trait WebhookResolver: Send + Sync {
    async fn resolve(&self, agent_id: &str) -> Result<WebhookTargets>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Default,
    Agent(String),
}

struct CacheEntry {
    fetched_at: Instant,
    record: Option<WebhookRecord>,
}

/// Three-tier resolver with a short-lived read-through cache
pub struct ConfigWebhookResolver {
    repo: Arc<dyn WebhookConfigRepository>,
    fallback: WebhookTargets,
    ttl: Duration,
    cache: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl ConfigWebhookResolver {
    pub fn new(
        repo: Arc<dyn WebhookConfigRepository>,
        fallback: WebhookTargets,
        ttl: Duration,
    ) -> Self {
        Self {
            repo,
            fallback,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Drop the cached agent entry, or the default entry for `None`
    pub async fn invalidate(&self, agent_id: Option<&str>) {
        let key = match agent_id {
            Some(id) => CacheKey::Agent(id.to_string()),
            None => CacheKey::Default,
        };
        self.cache.write().await.remove(&key);
    }

    async fn lookup(&self, key: CacheKey) -> Option<WebhookRecord> {
        if let Some(entry) = self.cache.read().await.get(&key) {
            if entry.fetched_at.elapsed() < self.ttl {
                return entry.record.clone();
            }
        }

        let fetched = match &key {
            CacheKey::Default => self.repo.get_default().await,
            CacheKey::Agent(id) => self.repo.get_for_agent(id).await,
        };
        match fetched {
            Ok(record) => {
                self.cache.write().await.insert(
                    key,
                    CacheEntry {
                        fetched_at: Instant::now(),
                        record: record.clone(),
                    },
                );
                record
            }
            Err(e) => {
                tracing::warn!("Failed to load webhook config {:?}: {}", key, e);
                None
            }
        }
    }
}

fn targets_from(record: WebhookRecord) -> Option<WebhookTargets> {
    let urls = split_list(&record.url);
    if urls.is_empty() {
        None
    } else {
        Some(WebhookTargets::new(urls, record.secret))
    }
}

#[async_trait]
impl WebhookResolver for ConfigWebhookResolver {
    async fn resolve(&self, agent_id: &str) -> Result<WebhookTargets> {
        if let Some(targets) = self
            .lookup(CacheKey::Agent(agent_id.to_string()))
            .await
            .and_then(targets_from)
        {
            return Ok(targets);
        }
        if let Some(targets) = self.lookup(CacheKey::Default).await.and_then(targets_from) {
            return Ok(targets);
        }
        Ok(self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonStore;
    use chrono::Utc;

    fn record(agent_id: Option<&str>, url: &str, secret: &str) -> WebhookRecord {
        WebhookRecord {
            agent_id: agent_id.map(String::from),
            url: url.to_string(),
            secret: secret.to_string(),
            updated_at: Utc::now(),
        }
    }

    fn resolver(store: Arc<JsonStore>, ttl: Duration) -> ConfigWebhookResolver {
        ConfigWebhookResolver::new(
            store,
            WebhookTargets::new(vec!["https://static.example.com".into()], "static"),
            ttl,
        )
    }

    #[tokio::test]
    async fn test_precedence() {
        let store = Arc::new(JsonStore::in_memory());
        let resolver = resolver(store.clone(), Duration::ZERO);

        assert_eq!(
            resolver.resolve("agent-a").await.unwrap().secret,
            "static"
        );

        store
            .save_default(record(None, "https://tenant.example.com", "tenant"))
            .await
            .unwrap();
        assert_eq!(
            resolver.resolve("agent-a").await.unwrap().urls,
            vec!["https://tenant.example.com"]
        );

        store
            .save_for_agent(record(
                Some("agent-a"),
                "https://a1.example.com, https://a2.example.com",
                "agent",
            ))
            .await
            .unwrap();
        let targets = resolver.resolve("agent-a").await.unwrap();
        assert_eq!(targets.urls.len(), 2);
        assert_eq!(targets.secret, "agent");

        // Other agents still see the tenant default
        assert_eq!(
            resolver.resolve("agent-b").await.unwrap().secret,
            "tenant"
        );
    }

    #[tokio::test]
    async fn test_blank_agent_url_falls_through() {
        let store = Arc::new(JsonStore::in_memory());
        store
            .save_for_agent(record(Some("agent-a"), "  ", "ignored"))
            .await
            .unwrap();
        let resolver = resolver(store, Duration::ZERO);
        assert_eq!(resolver.resolve("agent-a").await.unwrap().secret, "static");
    }

    #[tokio::test]
    async fn test_cache_and_invalidate() {
        let store = Arc::new(JsonStore::in_memory());
        let resolver = resolver(store.clone(), Duration::from_secs(60));
        assert_eq!(resolver.resolve("agent-a").await.unwrap().secret, "static");

        store
            .save_for_agent(record(Some("agent-a"), "https://a.example.com", "fresh"))
            .await
            .unwrap();
        assert_eq!(
            resolver.resolve("agent-a").await.unwrap().secret,
            "static",
            "cached negative lookup"
        );

        resolver.invalidate(Some("agent-a")).await;
        assert_eq!(resolver.resolve("agent-a").await.unwrap().secret, "fresh");
    }
}
