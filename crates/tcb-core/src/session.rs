use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};

use crate::{
    config::ClientOptions,
    credentials::CredentialStore,
    domain::{normalize_channel, ChannelEvent, ChatMessage, Credential},
    errors::Error,
    ledger::ChannelLedger,
    lifecycle::{ready_signal, ReadyListener, ReadyNotifier},
    ports::{ChatConnection, ChatConnector, TokenRefresher},
    Result,
};

const CHANNEL_EVENT_CAPACITY: usize = 64;
const RECONNECT_BACKOFF_START: Duration = Duration::from_secs(1);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(60);

/// The live, authenticated chat connection handed to the embedding application.
///
/// Already connected when handed out; it exposes no connect/disconnect.
#[derive(Clone)]
pub struct SessionHandle {
    conn: Arc<dyn ChatConnection>,
    connected_at: DateTime<Utc>,
}

impl SessionHandle {
    fn new(conn: Arc<dyn ChatConnection>) -> Self {
        Self {
            conn,
            connected_at: Utc::now(),
        }
    }

    pub fn username(&self) -> &str {
        self.conn.username()
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub async fn say(&self, channel: &str, text: &str) -> Result<()> {
        self.conn.say(channel, text).await
    }

    pub fn messages(&self) -> broadcast::Receiver<ChatMessage> {
        self.conn.messages()
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    pub async fn closed(&self) {
        self.conn.closed().await
    }

    fn connection(&self) -> &Arc<dyn ChatConnection> {
        &self.conn
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("username", &self.username())
            .field("connected_at", &self.connected_at)
            .field("closed", &self.is_closed())
            .finish()
    }
}

enum Phase {
    Idle,
    Starting,
    Ready(SessionHandle),
}

/// Owns the single chat session of the process.
///
/// At most one live session exists: `start` is a no-op while a session is
/// live (or being brought up). A session whose socket dropped is replaced by
/// `reconnect`, reusing the last working credential. Join/leave keep the
/// persisted channel ledger in step with the live connection, writing only
/// after the server confirmed.
pub struct SessionManager {
    connector: Arc<dyn ChatConnector>,
    refresher: Arc<dyn TokenRefresher>,
    ledger: ChannelLedger,
    credentials: CredentialStore,
    options: ClientOptions,
    max_auth_retries: u32,
    phase: Mutex<Phase>,
    credential: Mutex<Option<Credential>>,
    channels: Mutex<Vec<String>>,
    ready: std::sync::Mutex<Option<ReadyNotifier>>,
    ready_listener: std::sync::Mutex<Option<ReadyListener>>,
    events: broadcast::Sender<ChannelEvent>,
}

impl SessionManager {
    pub fn new(
        connector: Arc<dyn ChatConnector>,
        refresher: Arc<dyn TokenRefresher>,
        ledger: ChannelLedger,
        credentials: CredentialStore,
        options: ClientOptions,
        max_auth_retries: u32,
    ) -> Self {
        let (notifier, listener) = ready_signal();
        let (events, _) = broadcast::channel(CHANNEL_EVENT_CAPACITY);
        Self {
            connector,
            refresher,
            ledger,
            credentials,
            options,
            max_auth_retries,
            phase: Mutex::new(Phase::Idle),
            credential: Mutex::new(None),
            channels: Mutex::new(Vec::new()),
            ready: std::sync::Mutex::new(Some(notifier)),
            ready_listener: std::sync::Mutex::new(Some(listener)),
            events,
        }
    }

    /// Take the one listener for the "session ready" signal.
    pub fn take_ready_listener(&self) -> Result<ReadyListener> {
        self.ready_listener
            .lock()
            .map_err(|_| Error::External("ready listener lock poisoned".to_string()))?
            .take()
            .ok_or(Error::ReadyListenerTaken)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    /// Whether a session exists and its connection is still open.
    pub async fn is_running(&self) -> bool {
        self.handle().await.is_some()
    }

    /// The live session, if any. A session whose socket dropped is not live.
    pub async fn handle(&self) -> Option<SessionHandle> {
        self.current().await.filter(|h| !h.is_closed())
    }

    pub async fn channels(&self) -> Vec<String> {
        self.channels.lock().await.clone()
    }

    async fn current(&self) -> Option<SessionHandle> {
        match &*self.phase.lock().await {
            Phase::Ready(h) => Some(h.clone()),
            Phase::Idle | Phase::Starting => None,
        }
    }

    /// Bring the session up: connect (refreshing the token if it was rejected),
    /// rejoin the persisted channels, then fire the ready signal.
    ///
    /// No-op when a live session exists or no credential is given.
    pub async fn start(&self, credential: Option<Credential>) -> Result<()> {
        let Some(credential) = credential else {
            return Ok(());
        };
        if !self.claim_start().await {
            return Ok(());
        }

        let handle = self.bring_up(credential).await?;

        let notifier = self
            .ready
            .lock()
            .map_err(|_| Error::External("ready signal lock poisoned".to_string()))?
            .take();
        if let Some(notifier) = notifier {
            notifier.notify(handle);
        }
        Ok(())
    }

    /// Replace a dropped connection, using the last credential that worked
    /// (refreshing it if the server rejects it) and rejoining the Channel Set.
    ///
    /// Returns the live handle unchanged when the session is still up.
    pub async fn reconnect(&self) -> Result<SessionHandle> {
        let credential = self.credential.lock().await.clone();
        let Some(credential) = credential else {
            return Err(Error::NotRunning);
        };
        if !self.claim_start().await {
            return self.handle().await.ok_or(Error::NotRunning);
        }
        tracing::info!("reconnecting chat session");
        self.bring_up(credential).await
    }

    /// Keep the session up: whenever the live connection drops, reconnect with
    /// exponential backoff. Stops when the token can no longer be refreshed.
    pub fn spawn_supervisor(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.supervise().await })
    }

    async fn supervise(&self) {
        while let Some(handle) = self.current().await {
            handle.closed().await;
            tracing::warn!("chat connection lost");

            let mut delay = RECONNECT_BACKOFF_START;
            loop {
                match self.reconnect().await {
                    Ok(_) => break,
                    Err(e @ (Error::AuthRetriesExhausted { .. } | Error::TokenRefresh(_))) => {
                        tracing::error!("giving up on chat session: {e}");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!("reconnect failed, retrying in {delay:?}: {e}");
                        tokio::time::sleep(delay).await;
                        delay = (delay * 2).min(RECONNECT_BACKOFF_MAX);
                    }
                }
            }
        }
    }

    /// Move to `Starting` unless a live session exists or one is coming up.
    async fn claim_start(&self) -> bool {
        let mut phase = self.phase.lock().await;
        let free = match &*phase {
            Phase::Idle => true,
            Phase::Starting => false,
            Phase::Ready(h) => h.is_closed(),
        };
        if free {
            *phase = Phase::Starting;
        }
        free
    }

    async fn bring_up(&self, credential: Credential) -> Result<SessionHandle> {
        *self.credential.lock().await = Some(credential.clone());
        let conn = match self.create_client(credential).await {
            Ok(conn) => conn,
            Err(e) => {
                *self.phase.lock().await = Phase::Idle;
                return Err(e);
            }
        };
        let handle = SessionHandle::new(conn);
        tracing::info!("chat session connected as {}", handle.username());

        {
            let mut channels = self.channels.lock().await;
            *channels = dedup_channels(self.ledger.load().await);
            rejoin(&handle, &channels).await;
        }

        *self.phase.lock().await = Phase::Ready(handle.clone());
        Ok(handle)
    }

    /// Connect with `credential`. A rejected token triggers a forced refresh and
    /// another attempt, up to `max_auth_retries` refreshes. Any other connect
    /// failure is returned unchanged.
    pub async fn create_client(&self, credential: Credential) -> Result<Arc<dyn ChatConnection>> {
        let mut credential = credential;
        let mut refreshes = 0u32;
        loop {
            match self.connector.connect(&self.options, &credential).await {
                Ok(conn) => return Ok(conn),
                Err(e) if e.is_auth_failure() => {
                    if refreshes >= self.max_auth_retries {
                        return Err(Error::AuthRetriesExhausted {
                            attempts: refreshes,
                            reason: e.to_string(),
                        });
                    }
                    refreshes += 1;
                    tracing::warn!(
                        "chat login rejected, refreshing access token ({refreshes}/{})",
                        self.max_auth_retries
                    );
                    credential = self.handle_auth_error(&credential).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Force a token refresh and persist the new credential.
    async fn handle_auth_error(&self, credential: &Credential) -> Result<Credential> {
        let fresh = self.refresher.refresh(credential, true).await?;
        self.credentials.store(&fresh).await?;
        *self.credential.lock().await = Some(fresh.clone());
        Ok(fresh)
    }

    /// The live handle, reconnecting first if the socket dropped.
    async fn live_handle(&self) -> Result<SessionHandle> {
        match self.handle().await {
            Some(handle) => Ok(handle),
            None => self.reconnect().await,
        }
    }

    /// Join `channel` and record it. Fails without side effects when the
    /// channel is already recorded.
    pub async fn join_channel(&self, channel: &str) -> Result<String> {
        let channel = checked_channel(channel)?;
        if self.channels.lock().await.contains(&channel) {
            return Err(Error::AlreadyJoined(channel));
        }
        let handle = self.live_handle().await?;

        let mut channels = self.channels.lock().await;
        if channels.contains(&channel) {
            return Err(Error::AlreadyJoined(channel));
        }
        handle.connection().join(&channel).await?;
        let mut next = channels.clone();
        next.push(channel.clone());
        self.ledger.store(&next).await?;
        *channels = next;
        drop(channels);

        tracing::info!("joined #{channel}");
        let _ = self.events.send(ChannelEvent::Joined(channel.clone()));
        Ok(channel)
    }

    /// Leave `channel` and drop it from the record. Leaving a channel that was
    /// never recorded is tolerated.
    pub async fn leave_channel(&self, channel: &str) -> Result<String> {
        let channel = checked_channel(channel)?;
        let handle = self.live_handle().await?;

        let mut channels = self.channels.lock().await;
        handle.connection().part(&channel).await?;
        let next: Vec<String> = channels.iter().filter(|c| **c != channel).cloned().collect();
        self.ledger.store(&next).await?;
        *channels = next;
        drop(channels);

        tracing::info!("left #{channel}");
        let _ = self.events.send(ChannelEvent::Left(channel.clone()));
        Ok(channel)
    }
}

fn checked_channel(raw: &str) -> Result<String> {
    let channel = normalize_channel(raw);
    if channel.is_empty() || channel.contains(char::is_whitespace) {
        return Err(Error::InvalidChannel(raw.to_string()));
    }
    Ok(channel)
}

/// Normalized, duplicate-free, first occurrence wins.
fn dedup_channels(raw: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for channel in raw {
        let channel = normalize_channel(&channel);
        if !channel.is_empty() && !out.contains(&channel) {
            out.push(channel);
        }
    }
    out
}

/// Rejoin all `channels` at once; failures are logged and otherwise ignored.
async fn rejoin(handle: &SessionHandle, channels: &[String]) {
    let joins = channels.iter().map(|channel| async move {
        (channel, handle.connection().join(channel).await)
    });
    let mut rejoined = 0usize;
    for (channel, outcome) in join_all(joins).await {
        match outcome {
            Ok(()) => rejoined += 1,
            Err(e) => tracing::warn!("failed to rejoin #{channel}: {e}"),
        }
    }
    tracing::info!("rejoined {rejoined}/{} persisted channel(s)", channels.len());
}
