//! Collaborators the core drives but does not implement.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::{
    config::ClientOptions,
    domain::{ChatMessage, Credential, SetupInstructions},
    Result,
};

/// A live, authenticated chat connection.
///
/// Channel names are passed without the leading `#`.
#[async_trait]
pub trait ChatConnection: Send + Sync {
    /// Login the connection is authenticated as.
    fn username(&self) -> &str;

    async fn join(&self, channel: &str) -> Result<()>;
    async fn part(&self, channel: &str) -> Result<()>;
    async fn say(&self, channel: &str, text: &str) -> Result<()>;

    fn messages(&self) -> broadcast::Receiver<ChatMessage>;

    /// Whether the socket behind this connection is gone.
    fn is_closed(&self) -> bool;

    /// Resolves once the connection has closed, for whatever reason.
    async fn closed(&self);
}

/// Creates chat connections.
///
/// A rejected token must surface as `Error::Connect` carrying the server's
/// reason text so the session manager can recognize it.
#[async_trait]
pub trait ChatConnector: Send + Sync {
    async fn connect(
        &self,
        options: &ClientOptions,
        credential: &Credential,
    ) -> Result<Arc<dyn ChatConnection>>;
}

/// Exchanges stale credentials for fresh ones.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// With `force_refresh` the provider must mint a new token even if the
    /// current one still looks valid.
    async fn refresh(&self, credential: &Credential, force_refresh: bool) -> Result<Credential>;
}

/// First-run OAuth onboarding as seen by the bootstrap orchestrator.
#[async_trait]
pub trait OnboardingPort: Send + Sync {
    async fn existing_credentials(&self) -> Result<Option<Credential>>;
    async fn begin_setup(&self) -> Result<SetupInstructions>;
    async fn is_setup_complete(&self) -> bool;
    /// Whether `token` is the one-time token handed out by `begin_setup`.
    async fn verify_setup_token(&self, token: &str) -> bool;
    async fn store_credentials(&self, credential: &Credential) -> Result<()>;
    async fn mark_setup_complete(&self);
}
