//! Gateway assembly and lifecycle

use super::router::EventRouter;
use crate::config::RelayGateConfig;
use crate::error::{Error, Result};
use crate::forward::AutoForwardPipeline;
use crate::pairing::PairingController;
use crate::protocol::{ClientFactory, CredentialStoreProvider};
use crate::registry::ConnectionRegistry;
use crate::stats::{GatewayStats, StatsSnapshot};
use crate::store::{Repositories, SessionState};
use crate::webhook::{
    ConfigWebhookResolver, HttpWebhookSender, WebhookConfigService, WebhookDispatcher,
    WebhookTargets,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Gateway lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayState {
    /// Not started
    Stopped,
    /// Starting up
    Starting,
    /// Running
    Running,
    /// Shutting down
    ShuttingDown,
}

/// Point-in-time view of the gateway
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub state: GatewayState,
    pub connections: usize,
    pub stats: StatsSnapshot,
}

/// RelayGate gateway: every component wired around one connection registry
pub struct Gateway {
    config: RelayGateConfig,
    state: Arc<RwLock<GatewayState>>,
    stats: Arc<GatewayStats>,
    repositories: Repositories,
    registry: Arc<ConnectionRegistry>,
    pairing: Arc<PairingController>,
    pipeline: Arc<AutoForwardPipeline>,
    dispatcher: Arc<WebhookDispatcher>,
    webhooks: Arc<WebhookConfigService>,
}

impl Gateway {
    pub fn new(
        config: RelayGateConfig,
        provider: Arc<dyn CredentialStoreProvider>,
        factory: Arc<dyn ClientFactory>,
        repositories: Repositories,
    ) -> Result<Self> {
        let stats = Arc::new(GatewayStats::new());
        let registry = Arc::new(ConnectionRegistry::new(provider, factory));

        let pairing = Arc::new(PairingController::new(
            config.pairing.clone(),
            config.ai.clone(),
            registry.clone(),
            repositories.sessions.clone(),
            repositories.api_keys.clone(),
            stats.clone(),
        ));
        let pipeline = Arc::new(AutoForwardPipeline::new(
            &config,
            registry.clone(),
            repositories.sessions.clone(),
            repositories.api_keys.clone(),
            stats.clone(),
        )?);

        let resolver = Arc::new(ConfigWebhookResolver::new(
            repositories.webhooks.clone(),
            WebhookTargets::new(config.webhook.urls.clone(), config.webhook.secret.clone()),
            config.webhook.cache_ttl(),
        ));
        let sender = Arc::new(HttpWebhookSender::new(config.webhook.timeout())?);
        let dispatcher = Arc::new(WebhookDispatcher::new(
            resolver.clone(),
            sender,
            config.webhook.timeout(),
        ));
        let webhooks = Arc::new(WebhookConfigService::new(
            repositories.webhooks.clone(),
            repositories.sessions.clone(),
            resolver,
        ));

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(GatewayState::Stopped)),
            stats,
            repositories,
            registry,
            pairing,
            pipeline,
            dispatcher,
            webhooks,
        })
    }

    /// Get current state
    pub async fn state(&self) -> GatewayState {
        *self.state.read().await
    }

    /// Install the event router and reconnect agents that were paired
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != GatewayState::Stopped {
            return Err(Error::Gateway("Gateway already running".to_string()));
        }
        *state = GatewayState::Starting;
        drop(state);

        tracing::info!("Starting RelayGate");

        let router = EventRouter::new(
            self.registry.clone(),
            self.pairing.clone(),
            self.pipeline.clone(),
            self.dispatcher.clone(),
            self.stats.clone(),
        );
        self.registry.set_event_sink(Arc::new(router)).await;

        let resumed = self.resume_sessions().await;

        *self.state.write().await = GatewayState::Running;
        tracing::info!(resumed, "RelayGate started");
        Ok(())
    }

    /// Disconnect every agent; credential stores stay on disk
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != GatewayState::Running {
            return Ok(());
        }
        *state = GatewayState::ShuttingDown;
        drop(state);

        tracing::info!("Stopping RelayGate");
        self.registry.shutdown().await;

        *self.state.write().await = GatewayState::Stopped;
        tracing::info!("RelayGate stopped");
        Ok(())
    }

    /// Reconnect every stored session whose device already paired.
    ///
    /// Agents that never completed pairing are left alone until a client
    /// asks for a code again; a connection opened only to find that out is
    /// discarded with its store.
    async fn resume_sessions(&self) -> usize {
        let records = match self.repositories.sessions.list().await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("Failed to list sessions: {}", e);
                return 0;
            }
        };

        let mut resumed = 0;
        for record in records {
            if record.status == SessionState::AwaitingQr {
                continue;
            }
            let agent_id = record.agent_id.as_str();
            let handle = match self.registry.acquire_connection(agent_id).await {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::warn!(agent = %agent_id, "Failed to open connection: {}", e);
                    continue;
                }
            };
            if handle.client.own_identity().is_none() {
                tracing::debug!(agent = %agent_id, "Device not paired, not resuming");
                if let Err(e) = self.registry.release_connection(agent_id).await {
                    tracing::warn!(agent = %agent_id, "Failed to discard connection: {}", e);
                }
                continue;
            }
            if handle.client.is_connected() {
                continue;
            }
            match handle.client.connect().await {
                Ok(()) => {
                    resumed += 1;
                    tracing::info!(agent = %agent_id, "Resumed session");
                }
                Err(e) => tracing::warn!(agent = %agent_id, "Failed to resume session: {}", e),
            }
        }
        resumed
    }

    pub async fn status(&self) -> GatewayStatus {
        GatewayStatus {
            state: self.state().await,
            connections: self.registry.len().await,
            stats: self.stats.snapshot(),
        }
    }

    pub fn config(&self) -> &RelayGateConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn pairing(&self) -> &Arc<PairingController> {
        &self.pairing
    }

    pub fn pipeline(&self) -> &Arc<AutoForwardPipeline> {
        &self.pipeline
    }

    pub fn webhooks(&self) -> &Arc<WebhookConfigService> {
        &self.webhooks
    }

    pub fn stats(&self) -> &Arc<GatewayStats> {
        &self.stats
    }
}

/// Builder for [`Gateway`]
pub struct GatewayBuilder {
    config: RelayGateConfig,
    provider: Option<Arc<dyn CredentialStoreProvider>>,
    factory: Option<Arc<dyn ClientFactory>>,
    repositories: Option<Repositories>,
}

impl GatewayBuilder {
    /// Create a new builder with default config
    pub fn new() -> Self {
        Self {
            config: RelayGateConfig::default(),
            provider: None,
            factory: None,
            repositories: None,
        }
    }

    /// Set the configuration
    pub fn config(mut self, config: RelayGateConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the AI backend base URL
    pub fn ai_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.ai.base_url = url.into();
        self
    }

    /// Set the tenant-wide webhook destinations
    pub fn webhook_urls(mut self, urls: Vec<String>) -> Self {
        self.config.webhook.urls = urls;
        self
    }

    pub fn credential_stores(mut self, provider: Arc<dyn CredentialStoreProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn client_factory(mut self, factory: Arc<dyn ClientFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn repositories(mut self, repositories: Repositories) -> Self {
        self.repositories = Some(repositories);
        self
    }

    /// Build the gateway
    pub fn build(self) -> Result<Gateway> {
        let provider = self
            .provider
            .ok_or_else(|| Error::Config("credential store provider is required".to_string()))?;
        let factory = self
            .factory
            .ok_or_else(|| Error::Config("protocol client factory is required".to_string()))?;
        let repositories = self
            .repositories
            .ok_or_else(|| Error::Config("repositories are required".to_string()))?;
        Gateway::new(self.config, provider, factory, repositories)
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::SendMessageRequest;
    use crate::pairing::CreateSessionRequest;
    use crate::protocol::mock::{MockBehavior, MockClientFactory};
    use crate::protocol::{
        CredentialStoreProvider, FileCredentialStoreProvider, InboundMessage, MessageContent,
        ProtocolEvent,
    };
    use crate::store::{JsonStore, SessionRecord, SessionRepository};
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const AGENT: &str = "agent-a";
    const PEER: &str = "628555000@s.whatsapp.net";

    struct Fixture {
        _dir: tempfile::TempDir,
        server: MockServer,
        gateway: Gateway,
        factory: Arc<MockClientFactory>,
        provider: Arc<FileCredentialStoreProvider>,
        store: Arc<JsonStore>,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        let provider = Arc::new(FileCredentialStoreProvider::new(dir.path().to_path_buf()));
        let factory = Arc::new(MockClientFactory::new(MockBehavior::default()));
        let store = Arc::new(JsonStore::in_memory());

        let mut config = RelayGateConfig::default();
        config.pairing.timeout_secs = 1;
        config.webhook.timeout_secs = 2;

        let gateway = GatewayBuilder::new()
            .config(config)
            .ai_base_url(server.uri())
            .webhook_urls(vec![format!("{}/hook", server.uri())])
            .credential_stores(provider.clone())
            .client_factory(factory.clone())
            .repositories(Repositories::from_store(store.clone()))
            .build()
            .unwrap();
        Fixture {
            _dir: dir,
            server,
            gateway,
            factory,
            provider,
            store,
        }
    }

    async fn pre_pair(fx: &Fixture) {
        let store = fx.provider.open(AGENT).await.unwrap();
        let mut device = store.load_or_create_device().await.unwrap();
        device.registered_jid = Some("628123456@s.whatsapp.net".into());
        store.save_device(&device).await.unwrap();
        store.close().await.unwrap();
    }

    fn request() -> CreateSessionRequest {
        CreateSessionRequest {
            user_id: "user-1".into(),
            agent_id: AGENT.into(),
            agent_name: "Support Bot".into(),
            api_key: Some("key-1".into()),
            endpoint_url_run: None,
        }
    }

    async fn wait_for_status(store: &JsonStore, status: SessionState) -> SessionRecord {
        for _ in 0..100 {
            if let Some(record) = store.find_by_agent(AGENT).await.unwrap() {
                if record.status == status {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("session never reached {}", status);
    }

    async fn wait_until(check: impl Fn() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_builder_requires_components() {
        assert!(matches!(
            GatewayBuilder::new().build(),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_gateway_lifecycle() {
        let fx = fixture().await;
        assert_eq!(fx.gateway.state().await, GatewayState::Stopped);

        fx.gateway.start().await.unwrap();
        assert_eq!(fx.gateway.state().await, GatewayState::Running);
        assert!(matches!(fx.gateway.start().await, Err(Error::Gateway(_))));

        fx.gateway.pairing().create_session(request()).await.unwrap();
        assert_eq!(fx.gateway.status().await.connections, 1);

        fx.gateway.stop().await.unwrap();
        assert_eq!(fx.gateway.state().await, GatewayState::Stopped);
        assert_eq!(fx.gateway.status().await.connections, 0);
    }

    #[tokio::test]
    async fn test_inbound_message_is_forwarded_and_published() {
        let fx = fixture().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&fx.server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/agents/{}/execute", AGENT)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"reply": "Sure!"})))
            .expect(1)
            .mount(&fx.server)
            .await;

        pre_pair(&fx).await;
        fx.gateway.start().await.unwrap();
        fx.gateway.pairing().create_session(request()).await.unwrap();
        let client = fx.factory.latest(AGENT).unwrap();

        client.emit(ProtocolEvent::Message(Box::new(InboundMessage {
            id: "3EB0001".into(),
            chat: PEER.into(),
            sender: PEER.into(),
            is_from_me: false,
            is_group: false,
            push_name: "Ana".into(),
            timestamp: Utc::now(),
            message: MessageContent::text("can you help?"),
        })));

        wait_until(|| !client.sent_texts().is_empty()).await;
        assert_eq!(client.sent_texts()[0].text, "Sure!");
        assert_eq!(fx.gateway.stats().snapshot().messages_received, 1);

        for _ in 0..100 {
            if hook_events(&fx.server).await.iter().any(|e| e == "message") {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("message event never reached the webhook");
    }

    async fn hook_events(server: &MockServer) -> Vec<String> {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == "/hook")
            .filter_map(|r| r.headers.get("x-relaygate-event"))
            .filter_map(|v| v.to_str().ok().map(String::from))
            .collect()
    }

    #[tokio::test]
    async fn test_lifecycle_events_update_session_record() {
        let fx = fixture().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&fx.server)
            .await;
        fx.gateway.start().await.unwrap();

        let resp = fx.gateway.pairing().create_session(request()).await.unwrap();
        assert!(resp.qr.is_some());
        let client = fx.factory.latest(AGENT).unwrap();

        client.complete_pairing("628123456@s.whatsapp.net").await;
        let record = wait_for_status(&fx.store, SessionState::Authenticated).await;
        assert!(record.last_connected_at.is_some());

        client.set_state(false, false);
        client.emit(ProtocolEvent::Disconnected);
        let record = wait_for_status(&fx.store, SessionState::Disconnected).await;
        assert!(record.last_disconnected_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_webhooks_are_counted() {
        let fx = fixture().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("x-relaygate-event", "connected"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&fx.server)
            .await;

        pre_pair(&fx).await;
        fx.gateway.start().await.unwrap();
        fx.gateway.pairing().create_session(request()).await.unwrap();

        let stats = fx.gateway.stats().clone();
        wait_until(|| stats.snapshot().webhook_failures >= 1).await;
    }

    #[tokio::test]
    async fn test_start_resumes_paired_sessions() {
        let fx = fixture().await;
        pre_pair(&fx).await;
        let now = Utc::now();
        fx.store
            .upsert(SessionRecord {
                user_id: "user-1".into(),
                agent_id: AGENT.into(),
                agent_name: "Support Bot".into(),
                api_key: "key-1".into(),
                endpoint_url_run: String::new(),
                status: SessionState::Authenticated,
                last_connected_at: Some(now),
                last_disconnected_at: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        fx.gateway.start().await.unwrap();

        let status = fx.gateway.pairing().get_session(AGENT).await;
        assert!(status.is_ready);
        let response = fx
            .gateway
            .pipeline()
            .send_message(
                AGENT,
                "key-1",
                SendMessageRequest {
                    to: "628555000".into(),
                    message: "back online".into(),
                },
            )
            .await
            .unwrap();
        assert!(response.delivered);
    }

    fn seeded_record(status: SessionState) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            user_id: "user-1".into(),
            agent_id: AGENT.into(),
            agent_name: "Support Bot".into(),
            api_key: "key-1".into(),
            endpoint_url_run: String::new(),
            status,
            last_connected_at: None,
            last_disconnected_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_start_discards_unpaired_disconnected_sessions() {
        let fx = fixture().await;
        fx.store
            .upsert(seeded_record(SessionState::Disconnected))
            .await
            .unwrap();

        fx.gateway.start().await.unwrap();

        assert_eq!(fx.gateway.status().await.connections, 0);
        assert!(fx.gateway.registry().get_connection(AGENT).await.is_none());
        assert!(!fx.provider.store_path(AGENT).exists());
    }

    #[tokio::test]
    async fn test_restart_resumes_agent_after_repeated_create() {
        let fx = fixture().await;
        pre_pair(&fx).await;
        fx.gateway.start().await.unwrap();
        fx.gateway.pairing().create_session(request()).await.unwrap();
        fx.gateway.pairing().create_session(request()).await.unwrap();

        let record = fx.store.find_by_agent(AGENT).await.unwrap().unwrap();
        assert_eq!(record.status, SessionState::Authenticated);

        fx.gateway.stop().await.unwrap();
        fx.gateway.start().await.unwrap();

        assert_eq!(fx.factory.build_count(), 2);
        let status = fx.gateway.pairing().get_session(AGENT).await;
        assert!(status.has_connection);
        assert!(status.is_ready);
    }

    #[tokio::test]
    async fn test_start_skips_unpaired_sessions() {
        let fx = fixture().await;
        fx.gateway.start().await.unwrap();
        fx.gateway.pairing().create_session(request()).await.unwrap();
        fx.gateway.stop().await.unwrap();

        fx.gateway.start().await.unwrap();
        assert_eq!(fx.factory.build_count(), 1);
        assert_eq!(fx.gateway.status().await.connections, 0);
    }
}
