//! Protocol data model: device identities, events and message envelopes

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Device identity persisted in an agent's credential store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Locally generated device identifier
    pub device_id: String,
    /// Registration id announced to the network
    pub registration_id: u32,
    /// Base64 public identity key
    pub identity_key: String,
    /// Account the device is paired with, set after a successful scan
    #[serde(default)]
    pub registered_jid: Option<String>,
    /// Hidden-user identity of the paired account
    #[serde(default)]
    pub registered_lid: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DeviceIdentity {
    /// Generate a fresh, unpaired device
    pub fn generate() -> Self {
        use base64::Engine;

        let mut rng = rand::thread_rng();
        let mut key = [0u8; 32];
        rng.fill_bytes(&mut key);

        Self {
            device_id: uuid::Uuid::new_v4().to_string(),
            registration_id: rng.next_u32() & 0x3fff,
            identity_key: base64::engine::general_purpose::STANDARD.encode(key),
            registered_jid: None,
            registered_lid: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the device has been paired with an account
    pub fn is_registered(&self) -> bool {
        self.registered_jid.is_some()
    }

    /// Identity of the paired account, if any
    pub fn agent_identity(&self) -> Option<AgentIdentity> {
        self.registered_jid.as_ref().map(|jid| AgentIdentity {
            jid: jid.clone(),
            lid: self.registered_lid.clone(),
        })
    }
}

/// The network identities an agent is reachable under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Phone-number identity
    pub jid: String,
    /// Hidden-user identity, when the network assigned one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lid: Option<String>,
}

/// Chat presence indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Composing,
    Paused,
}

/// Kind of uploaded media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    /// Pick the media kind from a MIME type
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime.to_ascii_lowercase();
        if mime.starts_with("image/") {
            MediaKind::Image
        } else if mime.starts_with("video/") {
            MediaKind::Video
        } else if mime.starts_with("audio/") {
            MediaKind::Audio
        } else {
            MediaKind::Document
        }
    }
}

/// Reference returned by the protocol library after an upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedMedia {
    pub url: String,
    pub direct_path: String,
    pub file_length: u64,
}

/// A media message ready to be sent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMedia {
    pub kind: MediaKind,
    pub upload: UploadedMedia,
    pub mime_type: String,
    pub caption: Option<String>,
    pub filename: Option<String>,
}

/// Event emitted on the pairing-code stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingCodeEvent {
    /// `code`, `success`, `timeout` or a library specific value
    pub event: String,
    /// Raw code to encode into the QR image, set for `code` events
    #[serde(default)]
    pub code: String,
}

impl PairingCodeEvent {
    pub const CODE: &'static str = "code";

    pub fn code(code: impl Into<String>) -> Self {
        Self {
            event: Self::CODE.to_string(),
            code: code.into(),
        }
    }

    pub fn is_code(&self) -> bool {
        self.event == Self::CODE
    }
}

/// Event delivered through a connection's event hook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// Inbound message
    Message(Box<InboundMessage>),
    /// Transport connected
    Connected,
    /// Transport dropped
    Disconnected,
    /// Pairing completed; the device is now bound to `jid`
    PairSuccess { jid: String },
    /// Pairing failed, usually a corrupt or conflicting credential store
    PairError { reason: String },
    /// The account removed this device
    LoggedOut { reason: String },
    /// Anything the gateway does not act on
    Other { name: String },
}

impl ProtocolEvent {
    /// Event name used for webhook deliveries
    pub fn name(&self) -> &str {
        match self {
            ProtocolEvent::Message(_) => "message",
            ProtocolEvent::Connected => "connected",
            ProtocolEvent::Disconnected => "disconnected",
            ProtocolEvent::PairSuccess { .. } => "pair_success",
            ProtocolEvent::PairError { .. } => "pair_error",
            ProtocolEvent::LoggedOut { .. } => "logged_out",
            ProtocolEvent::Other { name } => name,
        }
    }
}

/// Inbound message with its routing metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    /// Conversation the message belongs to
    pub chat: String,
    /// Author of the message
    pub sender: String,
    pub is_from_me: bool,
    pub is_group: bool,
    #[serde(default)]
    pub push_name: String,
    pub timestamp: DateTime<Utc>,
    pub message: MessageContent,
}

/// Message envelope as delivered by the protocol library
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extended_text_message: Option<ExtendedTextMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_message: Option<MediaMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_message: Option<MediaMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_message: Option<MediaMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_message: Option<MediaMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ephemeral_message: Option<WrappedMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_once_message: Option<WrappedMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_once_message_v2: Option<WrappedMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_once_message_v2_extension: Option<WrappedMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_message: Option<WrappedMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_message: Option<ProtocolMessage>,
}

impl MessageContent {
    /// Plain text message
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            conversation: Some(text.into()),
            ..Default::default()
        }
    }

    /// Context of the message, taken from whichever part carries one
    pub fn context_info(&self) -> Option<&ContextInfo> {
        if let Some(info) = self
            .extended_text_message
            .as_ref()
            .and_then(|m| m.context_info.as_ref())
        {
            return Some(info);
        }
        [
            &self.image_message,
            &self.video_message,
            &self.audio_message,
            &self.document_message,
        ]
        .into_iter()
        .flatten()
        .find_map(|m| m.context_info.as_ref())
    }
}

/// Wrapper carrying another message (view-once, ephemeral, edited)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WrappedMessage {
    pub message: Option<Box<MessageContent>>,
}

impl WrappedMessage {
    pub fn new(inner: MessageContent) -> Self {
        Self {
            message: Some(Box::new(inner)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtendedTextMessage {
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaMessage {
    pub mimetype: Option<String>,
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_info: Option<ContextInfo>,
}

/// Mentions and quoted-message metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextInfo {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mentioned_jid: Vec<String>,
    /// Author of the quoted message
    pub participant: Option<String>,
    /// Id of the quoted message
    pub stanza_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quoted_message: Option<Box<MessageContent>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProtocolMessage {
    pub edited_message: Option<Box<MessageContent>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_device_is_unregistered() {
        let device = DeviceIdentity::generate();
        assert!(!device.is_registered());
        assert!(device.agent_identity().is_none());
        assert_ne!(device.device_id, DeviceIdentity::generate().device_id);
    }

    #[test]
    fn test_media_kind_from_mime() {
        assert_eq!(MediaKind::from_mime("image/png"), MediaKind::Image);
        assert_eq!(MediaKind::from_mime("VIDEO/mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_mime("audio/ogg"), MediaKind::Audio);
        assert_eq!(MediaKind::from_mime("application/pdf"), MediaKind::Document);
    }

    #[test]
    fn test_message_content_wire_names() {
        let raw = r#"{
            "viewOnceMessageV2": {
                "message": {
                    "extendedTextMessage": {
                        "text": "hi",
                        "contextInfo": { "mentionedJid": ["123@s.whatsapp.net"] }
                    }
                }
            }
        }"#;
        let content: MessageContent = serde_json::from_str(raw).unwrap();
        let inner = content
            .view_once_message_v2
            .and_then(|w| w.message)
            .unwrap();
        let info = inner.context_info().unwrap();
        assert_eq!(info.mentioned_jid, vec!["123@s.whatsapp.net"]);
    }

    #[test]
    fn test_event_names() {
        assert_eq!(ProtocolEvent::Connected.name(), "connected");
        assert_eq!(
            ProtocolEvent::PairError {
                reason: "x".into()
            }
            .name(),
            "pair_error"
        );
        let json = serde_json::to_value(ProtocolEvent::PairSuccess {
            jid: "1@s.whatsapp.net".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "pair_success");
    }
}
