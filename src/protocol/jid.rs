//! Helpers for network identities (`user[:device]@server`)

/// Server for phone-number identities
pub const USER_SERVER: &str = "s.whatsapp.net";
/// Server for hidden-user identities
pub const HIDDEN_USER_SERVER: &str = "lid";
/// Server for group conversations
pub const GROUP_SERVER: &str = "g.us";
/// Server for broadcast lists and status updates
pub const BROADCAST_SERVER: &str = "broadcast";

/// Normalize a destination: trimmed, with the user server appended when
/// no server is present.
pub fn normalize(destination: &str) -> String {
    let trimmed = destination.trim();
    if trimmed.contains('@') {
        trimmed.to_string()
    } else {
        format!("{}@{}", trimmed, USER_SERVER)
    }
}

/// Server part, empty when absent
pub fn server(jid: &str) -> &str {
    jid.split_once('@').map(|(_, s)| s).unwrap_or("")
}

/// User part with any device or agent suffix removed
pub fn user_part(jid: &str) -> &str {
    let user = jid.split('@').next().unwrap_or("");
    let user = user.split(':').next().unwrap_or("");
    user.split('.').next().unwrap_or("")
}

pub fn is_group(jid: &str) -> bool {
    server(jid) == GROUP_SERVER
}

pub fn is_broadcast(jid: &str) -> bool {
    server(jid) == BROADCAST_SERVER
}

/// ASCII digits of `s`, in order
pub fn digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Whether two identities name the same user.
///
/// Tolerates device suffixes, differing servers and formatting around
/// phone numbers.
pub fn same_user(a: &str, b: &str) -> bool {
    let (ua, ub) = (user_part(a.trim()), user_part(b.trim()));
    if ua.is_empty() || ub.is_empty() {
        return false;
    }
    if ua == ub {
        return true;
    }
    let da = digits(ua);
    !da.is_empty() && da == digits(ub)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(" 628123 "), "628123@s.whatsapp.net");
        assert_eq!(normalize("1203630@g.us"), "1203630@g.us");
    }

    #[test]
    fn test_user_part_strips_device() {
        assert_eq!(user_part("628123:12@s.whatsapp.net"), "628123");
        assert_eq!(user_part("628123.0:3@s.whatsapp.net"), "628123");
        assert_eq!(user_part("98765@lid"), "98765");
        assert_eq!(user_part("628123"), "628123");
    }

    #[test]
    fn test_server_classification() {
        assert!(is_group("1203630@g.us"));
        assert!(is_broadcast("status@broadcast"));
        assert!(!is_group("628123@s.whatsapp.net"));
        assert_eq!(server("no-server"), "");
    }

    #[test]
    fn test_same_user() {
        assert!(same_user("628123:4@s.whatsapp.net", "628123@s.whatsapp.net"));
        assert!(same_user("+62 8123", "628123@s.whatsapp.net"));
        assert!(!same_user("628123@s.whatsapp.net", "628124@s.whatsapp.net"));
        assert!(!same_user("", "628123@s.whatsapp.net"));
    }
}
