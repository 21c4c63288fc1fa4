//! Decide whether an inbound message should reach the AI backend

use super::text::context_info;
use crate::config::AutoForwardConfig;
use crate::protocol::{jid, AgentIdentity, InboundMessage, MessageContent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    FromMe,
    Broadcast,
    SelfChat,
    GroupsDisabled,
    /// Group message that neither mentions nor replies to the agent
    NotAddressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Forward,
    Skip(SkipReason),
}

impl Eligibility {
    pub fn is_forward(&self) -> bool {
        matches!(self, Eligibility::Forward)
    }
}

/// Apply the forwarding rules to a message whose text was already extracted.
///
/// `own` is the agent's identity; without it group messages are never
/// considered addressed to the agent.
pub fn evaluate(
    msg: &InboundMessage,
    text: &str,
    own: Option<&AgentIdentity>,
    config: &AutoForwardConfig,
) -> Eligibility {
    if msg.is_from_me {
        return Eligibility::Skip(SkipReason::FromMe);
    }
    if jid::is_broadcast(&msg.chat) || jid::is_broadcast(&msg.sender) {
        return Eligibility::Skip(SkipReason::Broadcast);
    }
    if config.skip_self_chat && own.map_or(false, |own| is_own(own, &msg.chat)) {
        return Eligibility::Skip(SkipReason::SelfChat);
    }

    if !(msg.is_group || jid::is_group(&msg.chat)) {
        return Eligibility::Forward;
    }
    if !config.respond_in_groups {
        return Eligibility::Skip(SkipReason::GroupsDisabled);
    }
    match own {
        Some(own) if addressed_to(own, &msg.message, text) => Eligibility::Forward,
        _ => Eligibility::Skip(SkipReason::NotAddressed),
    }
}

fn is_own(own: &AgentIdentity, other: &str) -> bool {
    jid::same_user(&own.jid, other)
        || own
            .lid
            .as_deref()
            .map_or(false, |lid| jid::same_user(lid, other))
}

fn addressed_to(own: &AgentIdentity, content: &MessageContent, text: &str) -> bool {
    if let Some(info) = context_info(content) {
        if info.mentioned_jid.iter().any(|m| is_own(own, m)) {
            return true;
        }
        // Reply to one of the agent's messages
        if info.participant.as_deref().map_or(false, |p| is_own(own, p)) {
            return true;
        }
    }

    std::iter::once(own.jid.as_str())
        .chain(own.lid.as_deref())
        .map(jid::user_part)
        .filter(|user| !user.is_empty())
        .any(|user| mentions_token(text, user))
}

/// Whether `token` occurs in `text` as a whole word, so a phone number
/// embedded in a longer number does not count
fn mentions_token(text: &str, token: &str) -> bool {
    text.match_indices(token).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + token.len()..].chars().next();
        !before.map_or(false, |c| c.is_alphanumeric())
            && !after.map_or(false, |c| c.is_alphanumeric())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ContextInfo, ExtendedTextMessage};
    use chrono::Utc;

    const GROUP: &str = "120363041234@g.us";

    fn own() -> AgentIdentity {
        AgentIdentity {
            jid: "628123456:7@s.whatsapp.net".into(),
            lid: Some("99887766@lid".into()),
        }
    }

    fn message(chat: &str, content: MessageContent) -> InboundMessage {
        InboundMessage {
            id: "m1".into(),
            chat: chat.into(),
            sender: "628555000@s.whatsapp.net".into(),
            is_from_me: false,
            is_group: jid::is_group(chat),
            push_name: "Ana".into(),
            timestamp: Utc::now(),
            message: content,
        }
    }

    fn with_context(text: &str, info: ContextInfo) -> MessageContent {
        MessageContent {
            extended_text_message: Some(ExtendedTextMessage {
                text: Some(text.into()),
                context_info: Some(info),
            }),
            ..Default::default()
        }
    }

    fn check(msg: &InboundMessage, text: &str) -> Eligibility {
        evaluate(msg, text, Some(&own()), &AutoForwardConfig::default())
    }

    #[test]
    fn test_direct_message_forwarded() {
        let msg = message("628555000@s.whatsapp.net", MessageContent::text("hi"));
        assert!(check(&msg, "hi").is_forward());
    }

    #[test]
    fn test_from_me_skipped() {
        let mut msg = message("628555000@s.whatsapp.net", MessageContent::text("hi"));
        msg.is_from_me = true;
        assert_eq!(check(&msg, "hi"), Eligibility::Skip(SkipReason::FromMe));
    }

    #[test]
    fn test_broadcast_skipped() {
        let msg = message("status@broadcast", MessageContent::text("story"));
        assert_eq!(check(&msg, "story"), Eligibility::Skip(SkipReason::Broadcast));
    }

    #[test]
    fn test_self_chat_is_configurable() {
        let msg = message("628123456@s.whatsapp.net", MessageContent::text("note"));
        assert_eq!(check(&msg, "note"), Eligibility::Skip(SkipReason::SelfChat));

        let config = AutoForwardConfig {
            skip_self_chat: false,
            ..Default::default()
        };
        assert!(evaluate(&msg, "note", Some(&own()), &config).is_forward());
    }

    #[test]
    fn test_group_without_address_skipped() {
        let msg = message(GROUP, MessageContent::text("lunch?"));
        assert_eq!(
            check(&msg, "lunch?"),
            Eligibility::Skip(SkipReason::NotAddressed)
        );
    }

    #[test]
    fn test_group_structured_mention_forwarded() {
        let content = with_context(
            "@Support can you help",
            ContextInfo {
                mentioned_jid: vec!["99887766@lid".into()],
                ..Default::default()
            },
        );
        let msg = message(GROUP, content);
        assert!(check(&msg, "@Support can you help").is_forward());
    }

    #[test]
    fn test_group_mention_tolerates_device_suffix() {
        let content = with_context(
            "hey bot",
            ContextInfo {
                mentioned_jid: vec!["628123456@s.whatsapp.net".into()],
                ..Default::default()
            },
        );
        let msg = message(GROUP, content);
        assert!(check(&msg, "hey bot").is_forward());
    }

    #[test]
    fn test_group_text_mention_forwarded() {
        let msg = message(GROUP, MessageContent::text("@628123456 status?"));
        assert!(check(&msg, "@628123456 status?").is_forward());
    }

    #[test]
    fn test_group_number_inside_longer_number_skipped() {
        let text = "call 0628123456789 after lunch";
        let msg = message(GROUP, MessageContent::text(text));
        assert_eq!(check(&msg, text), Eligibility::Skip(SkipReason::NotAddressed));

        let text = "ping 99887766, are you there";
        let msg = message(GROUP, MessageContent::text(text));
        assert!(check(&msg, text).is_forward());
    }

    #[test]
    fn test_mentions_token_boundaries() {
        assert!(mentions_token("@628123456 hi", "628123456"));
        assert!(mentions_token("628123456", "628123456"));
        assert!(!mentions_token("x628123456", "628123456"));
        assert!(!mentions_token("6281234567", "628123456"));
        assert!(mentions_token("6281234567 or 628123456!", "628123456"));
    }

    #[test]
    fn test_group_reply_to_agent_forwarded() {
        let content = with_context(
            "thanks, and what about tomorrow?",
            ContextInfo {
                participant: Some("628123456@s.whatsapp.net".into()),
                stanza_id: Some("3EB0ABC".into()),
                ..Default::default()
            },
        );
        let msg = message(GROUP, content);
        assert!(check(&msg, "thanks, and what about tomorrow?").is_forward());
    }

    #[test]
    fn test_group_reply_to_someone_else_skipped() {
        let content = with_context(
            "agreed",
            ContextInfo {
                participant: Some("628555999@s.whatsapp.net".into()),
                ..Default::default()
            },
        );
        let msg = message(GROUP, content);
        assert!(!check(&msg, "agreed").is_forward());
    }

    #[test]
    fn test_groups_disabled() {
        let msg = message(GROUP, MessageContent::text("@628123456 hi"));
        let config = AutoForwardConfig {
            respond_in_groups: false,
            ..Default::default()
        };
        assert_eq!(
            evaluate(&msg, "@628123456 hi", Some(&own()), &config),
            Eligibility::Skip(SkipReason::GroupsDisabled)
        );
    }

    #[test]
    fn test_group_without_own_identity_skipped() {
        let msg = message(GROUP, MessageContent::text("@628123456 hi"));
        assert!(!evaluate(&msg, "@628123456 hi", None, &AutoForwardConfig::default()).is_forward());
    }
}
