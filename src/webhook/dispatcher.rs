//! Best-effort fan-out to every resolved destination

use super::resolver::WebhookResolver;
use super::sender::{WebhookDelivery, WebhookSender};
use crate::error::{Error, Result};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// A destination that could not be reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryFailure {
    pub url: String,
    pub error: String,
}

/// Outcome of a dispatch that did not fail outright
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub attempted: usize,
    pub delivered: usize,
    pub failures: Vec<DeliveryFailure>,
}

pub struct WebhookDispatcher {
    resolver: Arc<dyn WebhookResolver>,
    sender: Arc<dyn WebhookSender>,
    timeout: Duration,
}

impl WebhookDispatcher {
    pub fn new(
        resolver: Arc<dyn WebhookResolver>,
        sender: Arc<dyn WebhookSender>,
        timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            sender,
            timeout,
        }
    }

    /// Deliver `payload` to every destination of `agent_id`.
    ///
    /// Succeeds when there is nothing to deliver or at least one destination
    /// accepted the payload; fails only when all of them failed.
    pub async fn dispatch<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        event: &str,
        agent_id: &str,
    ) -> Result<DispatchSummary> {
        let targets = self.resolver.resolve(agent_id).await?;
        let urls = targets.deliverable_urls();
        if urls.is_empty() {
            tracing::debug!(agent = %agent_id, event, "No webhook configured, skipping");
            return Ok(DispatchSummary::default());
        }

        let body = serde_json::to_vec(payload)?;
        let attempts = urls.iter().map(|url| {
            let delivery = WebhookDelivery {
                url,
                event,
                agent_id,
                body: &body,
                secret: &targets.secret,
            };
            async move {
                let outcome = match tokio::time::timeout(self.timeout, self.sender.deliver(delivery)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("timed out after {:?}", self.timeout)),
                };
                (*url, outcome)
            }
        });
        let results = join_all(attempts).await;

        let mut summary = DispatchSummary {
            attempted: results.len(),
            ..Default::default()
        };
        for (url, outcome) in results {
            match outcome {
                Ok(()) => summary.delivered += 1,
                Err(error) => summary.failures.push(DeliveryFailure {
                    url: url.to_string(),
                    error,
                }),
            }
        }

        if summary.delivered == 0 {
            let last_error = summary
                .failures
                .last()
                .map(|f| format!("{}: {}", f.url, f.error))
                .unwrap_or_default();
            tracing::warn!(
                agent = %agent_id,
                event,
                attempted = summary.attempted,
                "All webhook deliveries failed"
            );
            return Err(Error::AllWebhooksFailed {
                attempted: summary.attempted,
                last_error,
            });
        }

        for failure in &summary.failures {
            tracing::warn!(
                agent = %agent_id,
                event,
                url = %failure.url,
                "Webhook delivery failed: {}",
                failure.error
            );
        }
        tracing::debug!(
            agent = %agent_id,
            event,
            delivered = summary.delivered,
            attempted = summary.attempted,
            "Webhook dispatched"
        );
        Ok(summary)
    }
}
