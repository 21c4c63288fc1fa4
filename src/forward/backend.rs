//! HTTP client for the per-agent AI run endpoint

use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

pub const TRACE_HEADER: &str = "X-Trace-ID";

/// Body POSTed to the agent's run endpoint
#[derive(Debug, Clone, Serialize)]
pub struct BackendRequest<'a> {
    pub input: &'a str,
    pub session_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<&'a Value>,
}

pub struct AiClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl AiClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("relaygate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, timeout })
    }

    /// Run the agent and return its reply text
    pub async fn run(
        &self,
        endpoint: &str,
        api_key: &str,
        trace_id: &str,
        request: &BackendRequest<'_>,
    ) -> Result<String> {
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(api_key)
            .header(TRACE_HEADER, trace_id)
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(endpoint, e))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamError(format!(
                "AI backend responded with {}: {}",
                status,
                truncate(&body, 256)
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| self.transport_error(endpoint, e))?;
        extract_reply(&body).ok_or_else(|| {
            Error::UpstreamError("AI backend response carries no reply".to_string())
        })
    }

    fn transport_error(&self, endpoint: &str, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::UpstreamTimeout(format!("{} did not answer within {:?}", endpoint, self.timeout))
        } else {
            Error::UpstreamError(format!("{}: {}", endpoint, e))
        }
    }
}

/// Reply text from the first populated field, in precedence order:
/// `response`, `reply`, `output.output`, `output.final`, `output.message`,
/// `output` as a string, `message`.
pub fn extract_reply(body: &Value) -> Option<String> {
    let output = body.get("output");
    let candidates = [
        body.get("response"),
        body.get("reply"),
        output.and_then(|o| o.get("output")),
        output.and_then(|o| o.get("final")),
        output.and_then(|o| o.get("message")),
        output,
        body.get("message"),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .find(|s| !s.trim().is_empty())
        .map(String::from)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
