use std::fmt;

use serde::{Deserialize, Serialize};

/// OAuth credential pair for the bot account.
///
/// Always replaced as a whole; a refresh never patches a single field.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

// Tokens never end up in logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// A chat message received on a joined channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    /// Channel name without the leading `#`.
    pub channel: String,
    /// Login of the sender.
    pub user: String,
    pub text: String,
}

/// Published by the session manager after a join/leave has been persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    Joined(String),
    Left(String),
}

/// Channel name as chat and the ledger use it: lowercase, no leading `#`.
pub fn normalize_channel(channel: &str) -> String {
    channel.trim().trim_start_matches('#').to_lowercase()
}

/// What the operator needs to connect the bot account on first run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetupInstructions {
    /// One-time token guarding the setup route.
    pub token: String,
    pub setup_url: String,
    /// OAuth redirect URLs that must be registered on the Twitch application.
    pub redirect_urls: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_serializes_with_snake_case_fields() {
        let c = Credential::new("a", "r");
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v, serde_json::json!({"access_token": "a", "refresh_token": "r"}));
    }

    #[test]
    fn normalize_strips_hash_and_lowercases() {
        assert_eq!(normalize_channel("#FoseFx"), "fosefx");
        assert_eq!(normalize_channel(" test "), "test");
        assert_eq!(normalize_channel("#"), "");
    }

    #[test]
    fn credential_debug_redacts_tokens() {
        let c = Credential::new("secret-access", "secret-refresh");
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("secret"));
    }
}
