use std::sync::Arc;

use crate::{
    domain::{Credential, SetupInstructions},
    errors::Error,
    lifecycle::ReadyListener,
    ports::OnboardingPort,
    session::{SessionHandle, SessionManager},
    Result,
};

/// What `Bootstrap::run` ended with.
#[derive(Debug)]
pub enum BootstrapOutcome {
    /// The session is connected and the persisted channels were rejoined.
    Ready(SessionHandle),
    /// No credentials yet. The operator has to finish onboarding; `ready`
    /// resolves once `complete_setup` has brought the session up.
    AwaitingSetup {
        instructions: SetupInstructions,
        ready: ReadyListener,
    },
}

/// Sequences "ensure onboarded" -> "start session" -> "hand the session out".
pub struct Bootstrap {
    onboarding: Arc<dyn OnboardingPort>,
    session: Arc<SessionManager>,
}

impl Bootstrap {
    pub fn new(onboarding: Arc<dyn OnboardingPort>, session: Arc<SessionManager>) -> Self {
        Self {
            onboarding,
            session,
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub async fn run(&self) -> Result<BootstrapOutcome> {
        let Some(credential) = self.onboarding.existing_credentials().await? else {
            let ready = self.session.take_ready_listener()?;
            let instructions = self.onboarding.begin_setup().await?;
            return Ok(BootstrapOutcome::AwaitingSetup {
                instructions,
                ready,
            });
        };

        self.onboarding.mark_setup_complete().await;
        self.session.start(Some(credential)).await?;
        // Taken only once the session is up, so a failed start can be retried.
        let handle = self.session.take_ready_listener()?.wait().await?;
        tracing::info!(
            "bot session ready as {} (connected at {})",
            handle.username(),
            handle.connected_at().to_rfc3339()
        );
        Ok(BootstrapOutcome::Ready(handle))
    }

    /// Finish onboarding with a freshly minted credential: check the one-time
    /// setup token, persist the credential, mark setup complete and start the
    /// session.
    pub async fn complete_setup(&self, setup_token: &str, credential: Credential) -> Result<()> {
        if self.onboarding.is_setup_complete().await {
            return Err(Error::SetupAlreadyComplete);
        }
        if !self.onboarding.verify_setup_token(setup_token).await {
            return Err(Error::InvalidSetupToken);
        }
        self.onboarding.store_credentials(&credential).await?;
        self.onboarding.mark_setup_complete().await;
        self.session.start(Some(credential)).await
    }
}
