//! Request and response types of the forwarding operations

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Run the agent's AI on one input and relay the reply
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Alternate name for `input`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Conversation id; a bare phone number is accepted
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl RunRequest {
    pub fn new(input: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            input: Some(input.into()),
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    /// `input`, falling back to `message`
    pub fn input_text(&self) -> Option<&str> {
        [self.input.as_deref(), self.message.as_deref()]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResponse {
    pub reply: String,
    pub reply_sent: bool,
    pub trace_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub to: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub delivered: bool,
    pub message_id: String,
}

/// Send an image, video, audio clip or document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendMediaRequest {
    pub to: String,
    /// Base64 payload, optionally a `data:` URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Download source, used when `data` is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMediaResponse {
    pub delivered: bool,
    pub message_id: String,
    pub mime_type: String,
    pub size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_request_accepts_message_alias() {
        let req: RunRequest =
            serde_json::from_str(r#"{"message":"hi","session_id":"628555"}"#).unwrap();
        assert_eq!(req.input_text(), Some("hi"));

        let req: RunRequest =
            serde_json::from_str(r#"{"input":"  ","message":"fallback","session_id":"x"}"#)
                .unwrap();
        assert_eq!(req.input_text(), Some("fallback"));

        assert_eq!(RunRequest::default().input_text(), None);
    }
}
