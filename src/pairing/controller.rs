//! Per-agent pairing state machine
//!
//! ```text
//! no_store ──create──▶ awaiting_qr ──connect──▶ connected ──scan──▶ authenticated
//!                                                                        │
//!                         removed ◀──delete── disconnected ◀─────────────┘
//! ```

use super::render::render_qr_png;
use super::types::*;
use crate::config::{AiBackendConfig, PairingConfig};
use crate::error::{Error, Result};
use crate::protocol::{validate_agent_id, PairingCodeEvent};
use crate::registry::{CachedPairingCode, ConnectionHandle, ConnectionRegistry};
use crate::stats::GatewayStats;
use crate::store::{ApiKeyRepository, SessionRecord, SessionRepository, SessionState};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Drives pairing and session records for every agent
pub struct PairingController {
    config: PairingConfig,
    ai: AiBackendConfig,
    registry: Arc<ConnectionRegistry>,
    sessions: Arc<dyn SessionRepository>,
    api_keys: Arc<dyn ApiKeyRepository>,
    stats: Arc<GatewayStats>,
}

impl PairingController {
    pub fn new(
        config: PairingConfig,
        ai: AiBackendConfig,
        registry: Arc<ConnectionRegistry>,
        sessions: Arc<dyn SessionRepository>,
        api_keys: Arc<dyn ApiKeyRepository>,
        stats: Arc<GatewayStats>,
    ) -> Self {
        Self {
            config,
            ai,
            registry,
            sessions,
            api_keys,
            stats,
        }
    }

    /// Create or refresh a session and start pairing if needed.
    ///
    /// A pairing timeout is not an error: the response simply carries no code.
    pub async fn create_session(&self, req: CreateSessionRequest) -> Result<CreateSessionResponse> {
        req.validate()?;
        validate_agent_id(&req.agent_id)?;
        let agent_id = req.agent_id.as_str();

        let api_key = match non_blank(req.api_key.as_deref()) {
            Some(key) => key,
            None => self
                .api_keys
                .find_active_by_user(&req.user_id)
                .await?
                .map(|k| k.access_token)
                .unwrap_or_default(),
        };

        let existing = self.sessions.find(&req.user_id, agent_id).await?;
        let endpoint = non_blank(req.endpoint_url_run.as_deref())
            .or_else(|| {
                existing
                    .as_ref()
                    .and_then(|r| non_blank(Some(&r.endpoint_url_run)))
            })
            .unwrap_or_else(|| self.ai.endpoint_for(agent_id));

        let now = Utc::now();
        let record = SessionRecord {
            user_id: req.user_id.clone(),
            agent_id: agent_id.to_string(),
            agent_name: req.agent_name.trim().to_string(),
            api_key,
            endpoint_url_run: endpoint,
            status: SessionState::AwaitingQr,
            last_connected_at: existing.as_ref().and_then(|r| r.last_connected_at),
            last_disconnected_at: existing.as_ref().and_then(|r| r.last_disconnected_at),
            created_at: existing.as_ref().map(|r| r.created_at).unwrap_or(now),
            updated_at: now,
        };
        self.sessions.upsert(record.clone()).await?;
        if existing.is_none() {
            self.stats.session_opened();
        }

        let mut handle = self.registry.acquire_connection(agent_id).await?;
        if is_stale(&handle) {
            tracing::warn!(agent = %agent_id, "Stale pairing detected, resetting connection");
            self.registry.release_connection(agent_id).await?;
            handle = self.registry.acquire_connection(agent_id).await?;
        }

        let mut qr = None;
        if !handle.client.is_connected() {
            if handle.client.own_identity().is_none() {
                qr = self.listen_and_cache(&handle, self.config.timeout()).await?;
                if qr.is_none() {
                    tracing::info!(agent = %agent_id, "No pairing code before timeout");
                }
            } else {
                handle.client.connect().await?;
                self.record_transition(agent_id, handle.state()).await?;
            }
        } else if handle.client.is_authenticated() {
            // Already logged in; the upsert above must not leave it awaiting a code
            self.record_transition(agent_id, handle.state()).await?;
        }

        let record = self
            .sessions
            .find(&req.user_id, agent_id)
            .await?
            .unwrap_or(record);

        tracing::info!(
            agent = %agent_id,
            state = %handle.state(),
            has_qr = qr.is_some(),
            "Session created"
        );

        Ok(CreateSessionResponse {
            agent_id: agent_id.to_string(),
            is_ready: handle.client.is_authenticated(),
            session_state: handle.state(),
            qr,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    /// Current connectivity and cached code; never opens a connection
    pub async fn get_session(&self, agent_id: &str) -> SessionStatus {
        let handle = self.registry.get_connection(agent_id).await;
        let qr = self.registry.cached_pairing_code(agent_id).await;
        SessionStatus {
            agent_id: agent_id.to_string(),
            is_ready: handle
                .as_ref()
                .map(|h| h.client.is_authenticated())
                .unwrap_or(false),
            has_connection: handle.is_some(),
            session_state: handle
                .as_ref()
                .map(|h| h.state())
                .unwrap_or(SessionState::Disconnected),
            qr,
        }
    }

    /// Latest pairing code for an agent that is still pairing
    pub async fn get_qr(&self, agent_id: &str) -> Result<CachedPairingCode> {
        let handle = self
            .registry
            .get_connection(agent_id)
            .await
            .ok_or_else(|| Error::SessionNotFound(agent_id.to_string()))?;
        if handle.client.is_authenticated() {
            return Err(already_logged_in(agent_id));
        }

        if let Some(code) = self.fresh_code(agent_id).await {
            return Ok(code);
        }

        if handle.client.is_connected() {
            // Someone else is mid-pairing; give their stream a moment first
            for _ in 0..self.config.poll_attempts {
                tokio::time::sleep(self.config.poll_interval()).await;
                if handle.client.is_authenticated() {
                    return Err(already_logged_in(agent_id));
                }
                if let Some(code) = self.fresh_code(agent_id).await {
                    return Ok(code);
                }
            }
            return self.fetch_next_code(&handle).await;
        }

        self.listen_and_cache(&handle, self.config.timeout())
            .await?
            .ok_or_else(|| Error::PairingTimeout(format!("no pairing code for {}", agent_id)))
    }

    /// Release the connection and forget the session
    pub async fn delete_session(&self, agent_id: &str) -> Result<()> {
        let record = self.sessions.find_by_agent(agent_id).await?;
        self.registry.release_connection(agent_id).await?;

        match record {
            Some(record) => {
                if self.sessions.delete(&record.user_id, agent_id).await? {
                    self.stats.session_closed();
                }
                tracing::info!(agent = %agent_id, user = %record.user_id, "Session deleted");
            }
            None => tracing::debug!(agent = %agent_id, "No session record to delete"),
        }
        Ok(())
    }

    /// Tear down the connection and pair again from the stored record
    pub async fn reconnect_session(&self, agent_id: &str) -> Result<CreateSessionResponse> {
        let record = self
            .sessions
            .find_by_agent(agent_id)
            .await?
            .ok_or_else(|| Error::SessionNotFound(agent_id.to_string()))?;

        self.registry.release_connection(agent_id).await?;
        tracing::info!(agent = %agent_id, "Reconnecting session");

        self.create_session(CreateSessionRequest {
            user_id: record.user_id,
            agent_id: record.agent_id,
            agent_name: record.agent_name,
            api_key: Some(record.api_key).filter(|k| !k.trim().is_empty()),
            endpoint_url_run: Some(record.endpoint_url_run),
        })
        .await
    }

    /// Persist a connection state change observed for an agent
    pub async fn record_transition(&self, agent_id: &str, state: SessionState) -> Result<()> {
        let Some(mut record) = self.sessions.find_by_agent(agent_id).await? else {
            tracing::debug!(agent = %agent_id, %state, "No session record for transition");
            return Ok(());
        };

        let now = Utc::now();
        match state {
            SessionState::Connected | SessionState::Authenticated => {
                record.last_connected_at = Some(now)
            }
            SessionState::Disconnected => record.last_disconnected_at = Some(now),
            SessionState::AwaitingQr => {}
        }
        record.status = state;
        record.updated_at = now;
        self.sessions.upsert(record).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        self.sessions.list().await
    }

    async fn fresh_code(&self, agent_id: &str) -> Option<CachedPairingCode> {
        self.registry
            .cached_pairing_code(agent_id)
            .await
            .filter(|code| code.is_fresh(self.config.qr_max_age()))
    }

    /// Subscribe, connect, and wait for the first code
    async fn listen_and_cache(
        &self,
        handle: &ConnectionHandle,
        wait: Duration,
    ) -> Result<Option<CachedPairingCode>> {
        let codes = handle.client.subscribe_pairing_codes().await?;
        let first = self.collect_codes(handle, codes);
        handle.client.connect().await?;

        match tokio::time::timeout(wait, first).await {
            Ok(Ok(code)) => Ok(Some(code)),
            Ok(Err(_)) => {
                tracing::debug!(agent = %handle.agent_id, "Pairing stream ended without a code");
                Ok(None)
            }
            Err(_) => Ok(None),
        }
    }

    /// Wait for one more code on a connection that is already open
    async fn fetch_next_code(&self, handle: &ConnectionHandle) -> Result<CachedPairingCode> {
        let codes = handle.client.subscribe_pairing_codes().await?;
        let first = self.collect_codes(handle, codes);

        match tokio::time::timeout(self.config.next_code_timeout(), first).await {
            Ok(Ok(code)) => Ok(code),
            _ => Err(Error::PairingTimeout(format!(
                "no new pairing code for {}",
                handle.agent_id
            ))),
        }
    }

    /// Cache every code of the stream; the first one is also sent back.
    ///
    /// Stops when the stream ends or the connection is no longer current.
    fn collect_codes(
        &self,
        handle: &ConnectionHandle,
        mut codes: mpsc::Receiver<PairingCodeEvent>,
    ) -> oneshot::Receiver<CachedPairingCode> {
        let (tx, rx) = oneshot::channel();
        let registry = self.registry.clone();
        let agent_id = handle.agent_id.clone();
        let connection_id = handle.id;
        let size = self.config.qr_size;

        tokio::spawn(async move {
            let mut first = Some(tx);
            while let Some(event) = codes.recv().await {
                if !event.is_code() {
                    tracing::debug!(agent = %agent_id, event = %event.event, "Ignoring pairing event");
                    continue;
                }
                match registry.get_connection(&agent_id).await {
                    Some(current) if current.id == connection_id => {}
                    _ => break,
                }
                let rendered = match render_qr_png(&event.code, size) {
                    Ok(rendered) => rendered,
                    Err(e) => {
                        tracing::warn!(agent = %agent_id, "Dropping pairing code: {}", e);
                        continue;
                    }
                };
                registry.cache_pairing_code(&agent_id, rendered.clone()).await;
                tracing::debug!(agent = %agent_id, "Cached pairing code");
                if let Some(tx) = first.take() {
                    let _ = tx.send(rendered);
                }
            }
        });

        rx
    }
}

/// Paired and connected yet not logged in: the code on screen would be useless
fn is_stale(handle: &ConnectionHandle) -> bool {
    handle.client.own_identity().is_some()
        && handle.client.is_connected()
        && !handle.client.is_authenticated()
}

fn already_logged_in(agent_id: &str) -> Error {
    Error::PairingAlreadyExists(format!("agent {} is already logged in", agent_id))
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}
