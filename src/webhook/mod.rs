//! Webhook fan-out
//!
//! Every inbound event is POSTed to the webhook targets resolved for its
//! agent. Delivery is best effort: a dispatch only fails when every
//! destination failed.

mod dispatcher;
mod resolver;
mod sender;
mod service;

pub use dispatcher::{DeliveryFailure, DispatchSummary, WebhookDispatcher};
pub use resolver::{ConfigWebhookResolver, WebhookResolver};
pub use sender::{sign_payload, HttpWebhookSender, WebhookDelivery, WebhookSender, SIGNATURE_HEADER};
pub use service::WebhookConfigService;

use serde::{Deserialize, Serialize};

/// Destinations and shared secret resolved for one agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookTargets {
    pub urls: Vec<String>,
    /// Empty disables the signature header
    pub secret: String,
}

impl WebhookTargets {
    pub fn new(urls: Vec<String>, secret: impl Into<String>) -> Self {
        Self {
            urls,
            secret: secret.into(),
        }
    }

    /// URLs with blanks removed
    pub fn deliverable_urls(&self) -> Vec<&str> {
        self.urls
            .iter()
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
            .collect()
    }
}
