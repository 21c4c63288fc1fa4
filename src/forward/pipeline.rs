//! Relay inbound messages to the AI backend and deliver the replies

use super::backend::{AiClient, BackendRequest};
use super::eligibility::{evaluate, Eligibility};
use super::limiter::{Admission, LimiterRegistry};
use super::media::MediaLoader;
use super::sanitize::ReplySanitizer;
use super::text::extract_text;
use super::types::*;
use crate::config::{AiBackendConfig, AutoForwardConfig, RelayGateConfig};
use crate::error::{Error, Result};
use crate::protocol::{jid, InboundMessage, MediaKind, OutgoingMedia, Presence, ProtocolClient};
use crate::registry::ConnectionRegistry;
use crate::stats::GatewayStats;
use crate::store::{ApiKeyRepository, SessionRepository};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Filename used for documents sent without one
const DEFAULT_FILENAME: &str = "file";

pub struct AutoForwardPipeline {
    forward: AutoForwardConfig,
    ai_config: AiBackendConfig,
    registry: Arc<ConnectionRegistry>,
    sessions: Arc<dyn SessionRepository>,
    api_keys: Arc<dyn ApiKeyRepository>,
    stats: Arc<GatewayStats>,
    limiters: LimiterRegistry,
    ai: AiClient,
    media: MediaLoader,
    sanitizer: ReplySanitizer,
}

impl AutoForwardPipeline {
    pub fn new(
        config: &RelayGateConfig,
        registry: Arc<ConnectionRegistry>,
        sessions: Arc<dyn SessionRepository>,
        api_keys: Arc<dyn ApiKeyRepository>,
        stats: Arc<GatewayStats>,
    ) -> Result<Self> {
        Ok(Self {
            forward: config.forward.clone(),
            ai_config: config.ai.clone(),
            registry,
            sessions,
            api_keys,
            stats,
            limiters: LimiterRegistry::new(config.limits.clone()),
            ai: AiClient::new(config.ai.timeout())?,
            media: MediaLoader::new(&config.media)?,
            sanitizer: ReplySanitizer::new()?,
        })
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Forward one inbound message if it qualifies. Never fails: problems
    /// are logged.
    pub async fn handle_inbound(&self, agent_id: &str, msg: &InboundMessage) {
        if !self.forward.enabled {
            return;
        }

        let text = extract_text(&msg.message);
        if text.trim().is_empty() {
            tracing::debug!(agent = %agent_id, message = %msg.id, "No text, not forwarding");
            return;
        }

        let own = match self.registry.get_connection(agent_id).await {
            Some(handle) => handle.client.own_identity(),
            None => None,
        };
        if let Eligibility::Skip(reason) = evaluate(msg, &text, own.as_ref(), &self.forward) {
            tracing::debug!(agent = %agent_id, message = %msg.id, ?reason, "Not forwarding");
            return;
        }

        let api_key = match self.sessions.find_by_agent(agent_id).await {
            Ok(Some(session)) if session.has_api_key() => session.api_key,
            Ok(_) => {
                tracing::warn!(agent = %agent_id, "No API key for agent, skipping auto-forward");
                return;
            }
            Err(e) => {
                tracing::warn!(agent = %agent_id, "Session lookup failed: {}", e);
                return;
            }
        };

        let request = RunRequest {
            input: Some(text),
            message: None,
            session_id: msg.chat.clone(),
            parameters: Some(json!({ "max_steps": self.forward.max_steps })),
        };
        match self.execute_run(agent_id, &api_key, request).await {
            Ok(response) => tracing::info!(
                agent = %agent_id,
                trace_id = %response.trace_id,
                reply_sent = response.reply_sent,
                "Auto-forwarded message"
            ),
            Err(e) => tracing::warn!(
                agent = %agent_id,
                message = %msg.id,
                code = e.code(),
                "Auto-forward failed: {}",
                e
            ),
        }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Run the agent's AI on `request` and send the reply to the conversation
    pub async fn execute_run(
        &self,
        agent_id: &str,
        api_key: &str,
        request: RunRequest,
    ) -> Result<RunResponse> {
        let trace_id = Uuid::new_v4().to_string();
        let _admission = self.admit(agent_id).await?;
        let user_id = self.authorize(agent_id, api_key).await?;

        let session = self
            .sessions
            .find(&user_id, agent_id)
            .await?
            .ok_or_else(|| Error::SessionNotFound(agent_id.to_string()))?;

        let input = request
            .input_text()
            .ok_or_else(|| Error::InvalidRequest("input or message is required".to_string()))?;
        if request.session_id.trim().is_empty() {
            return Err(Error::InvalidRequest("session_id is required".to_string()));
        }
        let chat = jid::normalize(&request.session_id);
        let parameters = request
            .parameters
            .clone()
            .unwrap_or_else(|| json!({ "max_steps": self.ai_config.default_max_steps }));

        let client = self.ready_client(agent_id).await?;
        let endpoint = if session.endpoint_url_run.trim().is_empty() {
            self.ai_config.endpoint_for(agent_id)
        } else {
            session.endpoint_url_run.clone()
        };

        send_presence(client.as_ref(), &chat, Presence::Composing).await;
        let result = self
            .ai
            .run(
                &endpoint,
                api_key.trim(),
                &trace_id,
                &BackendRequest {
                    input,
                    session_id: &chat,
                    parameters: Some(&parameters),
                },
            )
            .await;
        send_presence(client.as_ref(), &chat, Presence::Paused).await;

        let raw = result.map_err(|e| {
            tracing::error!(agent = %agent_id, trace_id = %trace_id, "AI call failed: {}", e);
            e
        })?;
        let reply = self.sanitizer.sanitize(&raw);

        let mut reply_sent = false;
        if !reply.is_empty() {
            match client.send_text(&chat, &reply).await {
                Ok(_) => {
                    reply_sent = true;
                    self.stats.message_sent();
                }
                Err(e) => {
                    tracing::error!(agent = %agent_id, trace_id = %trace_id, "Failed to send reply: {}", e)
                }
            }
        }

        Ok(RunResponse {
            reply,
            reply_sent,
            trace_id,
        })
    }

    /// Send a text message from the agent
    pub async fn send_message(
        &self,
        agent_id: &str,
        api_key: &str,
        request: SendMessageRequest,
    ) -> Result<SendMessageResponse> {
        if request.to.trim().is_empty() || request.message.trim().is_empty() {
            return Err(Error::InvalidRequest("to and message are required".to_string()));
        }
        let _admission = self.admit(agent_id).await?;
        self.authorize(agent_id, api_key).await?;
        let client = self.ready_client(agent_id).await?;

        let message_id = client
            .send_text(&jid::normalize(&request.to), &request.message)
            .await?;
        self.stats.message_sent();
        Ok(SendMessageResponse {
            delivered: true,
            message_id,
        })
    }

    /// Send media from a base64 payload or a URL
    pub async fn send_media(
        &self,
        agent_id: &str,
        api_key: &str,
        request: SendMediaRequest,
    ) -> Result<SendMediaResponse> {
        if request.to.trim().is_empty() {
            return Err(Error::InvalidRequest("to is required".to_string()));
        }
        let data = non_blank(request.data.as_deref());
        let url = non_blank(request.url.as_deref());
        if data.is_none() && url.is_none() {
            return Err(Error::InvalidRequest("data or url is required".to_string()));
        }

        let _admission = self.admit(agent_id).await?;
        self.authorize(agent_id, api_key).await?;
        let client = self.ready_client(agent_id).await?;

        let loaded = match (data, url) {
            (Some(data), _) => self.media.decode(data)?,
            (None, Some(url)) => self.media.download(url).await?,
            (None, None) => return Err(Error::InvalidRequest("data or url is required".to_string())),
        };
        let mime_type = non_blank(request.mime_type.as_deref())
            .map(String::from)
            .unwrap_or(loaded.mime_type);
        let kind = MediaKind::from_mime(&mime_type);
        let size = loaded.data.len();

        let upload = client.upload_media(loaded.data, kind).await?;
        let caption = match kind {
            MediaKind::Audio => None,
            _ => non_blank(request.caption.as_deref()).map(String::from),
        };
        let filename = match kind {
            MediaKind::Document => Some(
                non_blank(request.filename.as_deref())
                    .unwrap_or(DEFAULT_FILENAME)
                    .to_string(),
            ),
            _ => non_blank(request.filename.as_deref()).map(String::from),
        };

        let message_id = client
            .send_media(
                &jid::normalize(&request.to),
                OutgoingMedia {
                    kind,
                    upload,
                    mime_type: mime_type.clone(),
                    caption,
                    filename,
                },
            )
            .await?;
        self.stats.message_sent();
        tracing::debug!(agent = %agent_id, kind = ?kind, bytes = size, "Media sent");

        Ok(SendMediaResponse {
            delivered: true,
            message_id,
            mime_type,
            size,
        })
    }

    /// Check `api_key` against the key table and the agent's session.
    /// Returns the owning user.
    ///
    /// A session without a key adopts the first key presented for it.
    pub async fn authorize(&self, agent_id: &str, api_key: &str) -> Result<String> {
        let token = api_key.trim();
        if token.is_empty() {
            return Err(Error::Unauthorized("missing API key".to_string()));
        }

        if let Some(key) = self.api_keys.find_active_by_token(token).await? {
            return Ok(key.user_id);
        }

        let Some(mut session) = self.sessions.find_by_agent(agent_id).await? else {
            return Err(Error::Unauthorized(format!("no session for agent {}", agent_id)));
        };

        if !session.has_api_key() {
            session.api_key = token.to_string();
            session.updated_at = chrono::Utc::now();
            let user_id = session.user_id.clone();
            self.sessions.upsert(session).await?;
            tracing::info!(agent = %agent_id, "Session adopted API key");
            return Ok(user_id);
        }
        if session.api_key == token {
            return Ok(session.user_id);
        }
        if let Some(active) = self.api_keys.find_active_by_user(&session.user_id).await? {
            if active.access_token == token {
                return Ok(session.user_id);
            }
        }

        Err(Error::Unauthorized(format!("invalid API key for agent {}", agent_id)))
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn admit(&self, agent_id: &str) -> Result<Admission> {
        self.limiters.admit(agent_id).await.map_err(|e| {
            self.stats.forward_rejected();
            tracing::warn!(agent = %agent_id, code = e.code(), "Request refused: {}", e);
            e
        })
    }

    async fn ready_client(&self, agent_id: &str) -> Result<Arc<dyn ProtocolClient>> {
        match self.registry.get_connection(agent_id).await {
            Some(handle) if handle.client.is_authenticated() => Ok(handle.client.clone()),
            Some(_) => Err(Error::SessionNotReady(format!("{} is not logged in", agent_id))),
            None => Err(Error::SessionNotReady(format!("{} has no connection", agent_id))),
        }
    }
}

async fn send_presence(client: &dyn ProtocolClient, chat: &str, presence: Presence) {
    if let Err(e) = client.send_presence(chat, presence).await {
        tracing::debug!(chat = %chat, ?presence, "Presence update failed: {}", e);
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
