use std::fmt;

/// A required channel as configured. Invite links cannot be resolved into a
/// chat, so membership in them can never be confirmed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelRef {
    Id(i64),
    Username(String),
    InviteLink(String),
}

impl ChannelRef {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        if raw.starts_with("-100") {
            return raw.parse().ok().map(ChannelRef::Id);
        }

        if raw.starts_with("http://") || raw.starts_with("https://") {
            let last = raw.trim_end_matches('/').rsplit('/').next().unwrap_or("");
            if last.is_empty() || last.starts_with('+') || last.starts_with("http") {
                return Some(ChannelRef::InviteLink(raw.to_string()));
            }
            return Some(ChannelRef::Username(format!("@{}", last)));
        }

        match raw.strip_prefix('@') {
            Some(name) => Some(ChannelRef::Username(format!("@{}", name))),
            None => Some(ChannelRef::Username(format!("@{}", raw))),
        }
    }

    /// Value for the `chat_id` field of the Bot API.
    pub fn chat_id(&self) -> Option<serde_json::Value> {
        match self {
            ChannelRef::Id(id) => Some(serde_json::json!(id)),
            ChannelRef::Username(name) => Some(serde_json::json!(name)),
            ChannelRef::InviteLink(_) => None,
        }
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelRef::Id(id) => write!(f, "{}", id),
            ChannelRef::Username(name) => write!(f, "{}", name),
            ChannelRef::InviteLink(link) => write!(f, "{}", link),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Membership {
    Member,
    NotMember,
    /// The bot lacks rights to inspect the channel.
    Uninspectable,
}
