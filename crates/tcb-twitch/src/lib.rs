//! Twitch adapter.
//!
//! Implements the `tcb-core` chat transport over Twitch IRC-over-WebSocket and
//! the token refresh port over the Twitch OAuth endpoints.

pub mod connection;
pub mod irc;
pub mod oauth;

pub use connection::{TwitchChatConnector, TwitchConnection};
pub use oauth::TwitchTokenRefresher;
