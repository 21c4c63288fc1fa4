//! Routing of protocol events to session records, webhooks and the
//! auto-forward pipeline

use crate::forward::AutoForwardPipeline;
use crate::pairing::PairingController;
use crate::protocol::ProtocolEvent;
use crate::registry::{ConnectionRegistry, EventSink};
use crate::stats::GatewayStats;
use crate::store::SessionState;
use crate::webhook::WebhookDispatcher;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Body POSTed to webhook destinations
#[derive(Debug, Serialize)]
pub struct WebhookEvent<'a> {
    pub event: &'a str,
    pub agent_id: &'a str,
    pub timestamp: DateTime<Utc>,
    pub data: &'a ProtocolEvent,
}

/// Subscriber installed on the connection registry
pub struct EventRouter {
    registry: Arc<ConnectionRegistry>,
    pairing: Arc<PairingController>,
    pipeline: Arc<AutoForwardPipeline>,
    dispatcher: Arc<WebhookDispatcher>,
    stats: Arc<GatewayStats>,
}

impl EventRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        pairing: Arc<PairingController>,
        pipeline: Arc<AutoForwardPipeline>,
        dispatcher: Arc<WebhookDispatcher>,
        stats: Arc<GatewayStats>,
    ) -> Self {
        Self {
            registry,
            pairing,
            pipeline,
            dispatcher,
            stats,
        }
    }

    /// Session state implied by a lifecycle event
    async fn transition_for(&self, agent_id: &str, event: &ProtocolEvent) -> Option<SessionState> {
        match event {
            ProtocolEvent::Connected => Some(
                self.registry
                    .get_connection(agent_id)
                    .await
                    .map(|handle| handle.state())
                    .unwrap_or(SessionState::Connected),
            ),
            ProtocolEvent::PairSuccess { .. } => Some(SessionState::Authenticated),
            ProtocolEvent::Disconnected | ProtocolEvent::LoggedOut { .. } => {
                Some(SessionState::Disconnected)
            }
            _ => None,
        }
    }

    fn spawn_webhook(&self, agent_id: &str, event: Arc<ProtocolEvent>) {
        let dispatcher = self.dispatcher.clone();
        let stats = self.stats.clone();
        let agent_id = agent_id.to_string();
        tokio::spawn(async move {
            let name = event.name();
            let payload = WebhookEvent {
                event: name,
                agent_id: &agent_id,
                timestamp: Utc::now(),
                data: event.as_ref(),
            };
            match dispatcher.dispatch(&payload, name, &agent_id).await {
                Ok(summary) if !summary.failures.is_empty() => {
                    tracing::warn!(
                        agent = %agent_id,
                        event = name,
                        delivered = summary.delivered,
                        failed = summary.failures.len(),
                        "Webhook partially delivered"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    stats.webhook_failed();
                    tracing::warn!(agent = %agent_id, event = name, "Webhook dispatch failed: {}", e);
                }
            }
        });
    }
}

#[async_trait]
impl EventSink for EventRouter {
    async fn on_event(&self, agent_id: &str, event: ProtocolEvent) {
        if let Some(state) = self.transition_for(agent_id, &event).await {
            tracing::info!(agent = %agent_id, event = event.name(), %state, "Session state changed");
            if let Err(e) = self.pairing.record_transition(agent_id, state).await {
                tracing::warn!(agent = %agent_id, "Failed to record session state: {}", e);
            }
        }

        let event = Arc::new(event);
        self.spawn_webhook(agent_id, event.clone());

        if let ProtocolEvent::Message(msg) = event.as_ref() {
            self.stats.message_received();
            tracing::debug!(agent = %agent_id, chat = %msg.chat, message = %msg.id, "Inbound message");

            let pipeline = self.pipeline.clone();
            let agent_id = agent_id.to_string();
            let event = event.clone();
            tokio::spawn(async move {
                if let ProtocolEvent::Message(msg) = event.as_ref() {
                    pipeline.handle_inbound(&agent_id, msg).await;
                }
            });
        }
    }
}
