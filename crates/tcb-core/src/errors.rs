/// Text the chat server sends when the access token is expired or invalid.
pub const AUTH_FAILURE_SIGNAL: &str = "Login authentication failed";

/// Core error type.
///
/// Adapter crates map their specific errors into this type so the session
/// manager can tell an expired token (retryable) from everything else (fatal).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The chat transport could not establish a session. Carries the reason
    /// reported by the server or socket, unchanged.
    #[error("{0}")]
    Connect(String),

    #[error("Bot already joined this chat: {0}")]
    AlreadyJoined(String),

    #[error("invalid channel name: {0:?}")]
    InvalidChannel(String),

    #[error("bot session is not running")]
    NotRunning,

    #[error("authentication still failing after {attempts} token refreshes: {reason}")]
    AuthRetriesExhausted { attempts: u32, reason: String },

    #[error("token refresh failed: {0}")]
    TokenRefresh(String),

    #[error("session ready signal was dropped before the session became ready")]
    ReadySignalDropped,

    #[error("session ready listener was already taken")]
    ReadyListenerTaken,

    #[error("setup token is missing or wrong")]
    InvalidSetupToken,

    #[error("bot is already set up")]
    SetupAlreadyComplete,

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Whether this is a connect failure caused by a rejected access token.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Error::Connect(reason) if reason.contains(AUTH_FAILURE_SIGNAL))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
