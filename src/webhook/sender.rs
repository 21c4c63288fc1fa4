//! Signed HTTP delivery of webhook payloads

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Header carrying `sha256=<hex HMAC-SHA256(secret, body)>`
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
pub const EVENT_HEADER: &str = "X-Relaygate-Event";
pub const AGENT_HEADER: &str = "X-Relaygate-Agent";

/// One delivery attempt to one URL
#[derive(Debug, Clone, Copy)]
pub struct WebhookDelivery<'a> {
    pub url: &'a str,
    pub event: &'a str,
    pub agent_id: &'a str,
    pub body: &'a [u8],
    pub secret: &'a str,
}

#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn deliver(&self, delivery: WebhookDelivery<'_>) -> Result<()>;
}

/// Delivers webhooks with reqwest
pub struct HttpWebhookSender {
    client: reqwest::Client,
}

impl HttpWebhookSender {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("relaygate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn deliver(&self, delivery: WebhookDelivery<'_>) -> Result<()> {
        let mut request = self
            .client
            .post(delivery.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(EVENT_HEADER, delivery.event)
            .header(AGENT_HEADER, delivery.agent_id)
            .body(delivery.body.to_vec());
        if !delivery.secret.is_empty() {
            request = request.header(SIGNATURE_HEADER, sign_payload(delivery.secret, delivery.body));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Webhook(format!(
                "{} responded with {}",
                delivery.url, status
            )));
        }
        Ok(())
    }
}

/// Signature header value for `body`
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let key = ring::hmac::Key::new(ring::hmac::HMAC_SHA256, secret.as_bytes());
    let mac = ring::hmac::sign(&key, body);
    format!("sha256={}", hex_encode(mac.as_ref()))
}

fn hex_encode(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn delivery<'a>(url: &'a str, body: &'a [u8], secret: &'a str) -> WebhookDelivery<'a> {
        WebhookDelivery {
            url,
            event: "message",
            agent_id: "agent-a",
            body,
            secret,
        }
    }

    #[test]
    fn test_signature_verifies() {
        let body = br#"{"event":"message"}"#;
        let signature = sign_payload("top-secret", body);
        let hex = signature.strip_prefix("sha256=").unwrap();
        assert_eq!(hex.len(), 64);

        let bytes: Vec<u8> = (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).unwrap())
            .collect();
        let key = ring::hmac::Key::new(ring::hmac::HMAC_SHA256, b"top-secret");
        assert!(ring::hmac::verify(&key, body, &bytes).is_ok());
    }

    #[tokio::test]
    async fn test_deliver_signs_and_tags_request() {
        let server = MockServer::start().await;
        let body = br#"{"event":"message","agent_id":"agent-a"}"#;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header(SIGNATURE_HEADER, sign_payload("s3cret", body).as_str()))
            .and(header(EVENT_HEADER, "message"))
            .and(header(AGENT_HEADER, "agent-a"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sender = HttpWebhookSender::new(Duration::from_secs(5)).unwrap();
        let url = format!("{}/hook", server.uri());
        sender.deliver(delivery(&url, body, "s3cret")).await.unwrap();
    }

    #[tokio::test]
    async fn test_unsigned_when_secret_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header_exists(SIGNATURE_HEADER))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let sender = HttpWebhookSender::new(Duration::from_secs(5)).unwrap();
        let url = server.uri();
        sender.deliver(delivery(&url, b"{}", "")).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let sender = HttpWebhookSender::new(Duration::from_secs(5)).unwrap();
        let url = server.uri();
        let err = sender.deliver(delivery(&url, b"{}", "")).await.unwrap_err();
        assert!(matches!(err, Error::Webhook(_)));
    }
}
