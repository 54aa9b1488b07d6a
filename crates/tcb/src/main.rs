use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tcb_core::{
    bootstrap::{Bootstrap, BootstrapOutcome},
    config::Config,
    credentials::CredentialStore,
    ledger::ChannelLedger,
    onboarding::Onboarding,
    session::SessionManager,
};
use tcb_twitch::{TwitchChatConnector, TwitchTokenRefresher};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tcb_core::logging::init("tcb")?;

    let cfg = Config::load()?;
    let refresher = TwitchTokenRefresher::new(cfg.client_id.clone(), cfg.client_secret.clone())?;
    let session = Arc::new(SessionManager::new(
        Arc::new(TwitchChatConnector::new()),
        Arc::new(refresher),
        ChannelLedger::new(cfg.channels_file()),
        CredentialStore::new(cfg.auth_file()),
        cfg.client.clone(),
        cfg.max_auth_retries,
    ));
    let onboarding = Arc::new(Onboarding::new(
        cfg.host.clone(),
        CredentialStore::new(cfg.auth_file()),
    ));
    let bootstrap = Bootstrap::new(onboarding, session);

    match bootstrap.run().await.context("bot startup failed")? {
        BootstrapOutcome::Ready(_) => {}
        BootstrapOutcome::AwaitingSetup { ready, .. } => tokio::select! {
            handle = ready.wait() => { handle?; }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        },
    }

    let session = bootstrap.session().clone();
    let mut supervisor = session.spawn_supervisor();

    tokio::select! {
        _ = log_messages(session) => {}
        _ = &mut supervisor => tracing::error!("chat session is gone and could not be restored"),
        _ = tokio::signal::ctrl_c() => {}
    }
    supervisor.abort();
    tracing::info!("shutting down");
    Ok(())
}

/// Log incoming chat, following the session across reconnects.
async fn log_messages(session: Arc<SessionManager>) {
    loop {
        let Some(handle) = session.handle().await else {
            tokio::time::sleep(Duration::from_secs(1)).await;
            continue;
        };
        let mut messages = handle.messages();
        loop {
            tokio::select! {
                msg = messages.recv() => match msg {
                    Ok(msg) => tracing::info!("[#{}] {}: {}", msg.channel, msg.user, msg.text),
                    Err(RecvError::Lagged(n)) => tracing::warn!("dropped {n} chat messages"),
                    Err(RecvError::Closed) => break,
                },
                _ = handle.closed() => break,
            }
        }
    }
}
