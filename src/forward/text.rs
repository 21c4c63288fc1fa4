//! Pull the human-readable text out of nested message envelopes

use crate::protocol::{ContextInfo, MessageContent};

/// Wrappers unwrapped before giving up
const MAX_UNWRAP_DEPTH: usize = 3;

/// Strip view-once, ephemeral and edit wrappers
pub fn unwrap_envelope(content: &MessageContent) -> &MessageContent {
    let mut current = content;
    for _ in 0..MAX_UNWRAP_DEPTH {
        let inner = [
            &current.view_once_message,
            &current.ephemeral_message,
            &current.view_once_message_v2,
            &current.view_once_message_v2_extension,
            &current.edited_message,
        ]
        .into_iter()
        .flatten()
        .find_map(|w| w.message.as_deref());

        match inner {
            Some(inner) => current = inner,
            None => break,
        }
    }
    current
}

/// Text of a message, or `""` when it carries none
pub fn extract_text(content: &MessageContent) -> String {
    let msg = unwrap_envelope(content);

    if let Some(text) = non_empty(msg.conversation.as_deref()) {
        return text;
    }
    if let Some(text) = non_empty(
        msg.extended_text_message
            .as_ref()
            .and_then(|m| m.text.as_deref()),
    ) {
        return text;
    }
    if let Some(edited) = msg
        .protocol_message
        .as_ref()
        .and_then(|p| p.edited_message.as_deref())
    {
        if let Some(text) = non_empty(
            edited
                .extended_text_message
                .as_ref()
                .and_then(|m| m.text.as_deref()),
        ) {
            return text;
        }
        if let Some(text) = non_empty(edited.conversation.as_deref()) {
            return text;
        }
    }
    String::new()
}

/// Mentions and quote metadata of the unwrapped message
pub fn context_info(content: &MessageContent) -> Option<&ContextInfo> {
    unwrap_envelope(content).context_info()
}

fn non_empty(text: Option<&str>) -> Option<String> {
    text.filter(|t| !t.trim().is_empty()).map(String::from)
}
