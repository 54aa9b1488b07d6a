use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tokio_util::sync::CancellationToken;

use tcb_core::{
    config::ClientOptions,
    domain::{normalize_channel, ChatMessage, Credential},
    errors::Error,
    ports::{ChatConnection, ChatConnector},
    Result,
};

use crate::{irc, irc::IrcMessage};

const SECURE_URL: &str = "wss://irc-ws.chat.twitch.tv:443";
const PLAIN_URL: &str = "ws://irc-ws.chat.twitch.tv:80";
const OUTBOUND_CAPACITY: usize = 256;
const MESSAGE_CAPACITY: usize = 1024;

/// NOTICE ids that mean a JOIN was refused.
const JOIN_REFUSALS: &[&str] = &[
    "msg_banned",
    "msg_channel_suspended",
    "msg_channel_blocked",
    "msg_requires_verified_phone_number",
    "tos_ban",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Op {
    Join,
    Part,
}

type Pending = Arc<Mutex<HashMap<(Op, String), oneshot::Sender<Result<()>>>>>;

/// Opens authenticated chat connections to Twitch.
#[derive(Clone, Debug, Default)]
pub struct TwitchChatConnector;

impl TwitchChatConnector {
    pub fn new() -> Self {
        Self
    }
}

fn endpoint(options: &ClientOptions) -> &str {
    match &options.server_url {
        Some(url) => url.as_str(),
        None if options.secure => SECURE_URL,
        None => PLAIN_URL,
    }
}

#[async_trait]
impl ChatConnector for TwitchChatConnector {
    async fn connect(
        &self,
        options: &ClientOptions,
        credential: &Credential,
    ) -> Result<Arc<dyn ChatConnection>> {
        let url = endpoint(options);
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| Error::Connect(format!("failed to reach twitch chat at {url}: {e}")))?;
        let (mut sink, mut source) = stream.split();

        let login = [
            "CAP REQ :twitch.tv/tags twitch.tv/commands".to_string(),
            format!("PASS oauth:{}", credential.access_token),
            format!("NICK {}", options.username),
        ];
        for line in login {
            if options.debug && !line.starts_with("PASS") {
                tracing::debug!("> {line}");
            }
            sink.send(WsMessage::text(line))
                .await
                .map_err(|e| Error::Connect(format!("failed to send login: {e}")))?;
        }

        // Wait for the welcome numeric; a NOTICE before it is a login failure.
        // Lines that arrive in the same frame after it go to the reader.
        let mut logged_in = false;
        let mut leftover = Vec::new();
        while let Some(frame) = source.next().await {
            let frame = frame.map_err(|e| Error::Connect(format!("chat socket error: {e}")))?;
            let WsMessage::Text(text) = frame else {
                continue;
            };
            for line in irc::lines(text.as_str()) {
                if logged_in {
                    leftover.push(line.to_string());
                    continue;
                }
                if options.debug {
                    tracing::debug!("< {line}");
                }
                let Some(msg) = IrcMessage::parse(line) else {
                    continue;
                };
                match msg.command.as_str() {
                    "001" => logged_in = true,
                    "NOTICE" => {
                        let reason = msg.trailing().unwrap_or("login rejected").to_string();
                        return Err(Error::Connect(reason));
                    }
                    "PING" => {
                        let pong = format!("PONG :{}", msg.trailing().unwrap_or("tmi.twitch.tv"));
                        sink.send(WsMessage::text(pong))
                            .await
                            .map_err(|e| Error::Connect(format!("failed to answer ping: {e}")))?;
                    }
                    _ => {}
                }
            }
            if logged_in {
                break;
            }
        }
        if !logged_in {
            return Err(Error::Connect("connection closed during login".to_string()));
        }

        let cancel = CancellationToken::new();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
        let (messages, _) = broadcast::channel(MESSAGE_CAPACITY);

        // Writer
        {
            let cancel = cancel.clone();
            let debug = options.debug;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        line = out_rx.recv() => {
                            let Some(line) = line else { break };
                            if debug {
                                tracing::debug!("> {line}");
                            }
                            if let Err(e) = sink.send(WsMessage::text(line)).await {
                                tracing::warn!("chat socket write failed: {e}");
                                cancel.cancel();
                                break;
                            }
                        }
                    }
                }
                let _ = sink.close().await;
            });
        }

        // Reader
        {
            let reader = Reader {
                username: options.username.clone(),
                debug: options.debug,
                out: out_tx.clone(),
                pending: pending.clone(),
                messages: messages.clone(),
                cancel: cancel.clone(),
            };
            let cancel = cancel.clone();
            tokio::spawn(async move {
                for line in &leftover {
                    reader.dispatch_frame(line);
                }
                loop {
                    let frame = tokio::select! {
                        _ = cancel.cancelled() => break,
                        frame = source.next() => frame,
                    };
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => reader.dispatch_frame(text.as_str()),
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!("chat socket read failed: {e}");
                            break;
                        }
                    }
                }
                tracing::info!("chat connection closed");
                cancel.cancel();
                reader.fail_all_pending();
            });
        }

        Ok(Arc::new(TwitchConnection {
            username: options.username.clone(),
            join_timeout: options.join_timeout,
            out: out_tx,
            pending,
            messages,
            cancel,
        }))
    }
}

struct Reader {
    username: String,
    debug: bool,
    out: mpsc::Sender<String>,
    pending: Pending,
    messages: broadcast::Sender<ChatMessage>,
    cancel: CancellationToken,
}

impl Reader {
    fn dispatch_frame(&self, frame: &str) {
        for line in irc::lines(frame) {
            if self.debug {
                tracing::debug!("< {line}");
            }
            if let Some(msg) = IrcMessage::parse(line) {
                self.dispatch(msg);
            }
        }
    }

    fn dispatch(&self, msg: IrcMessage) {
        match msg.command.as_str() {
            "PING" => {
                let pong = format!("PONG :{}", msg.trailing().unwrap_or("tmi.twitch.tv"));
                if self.out.try_send(pong).is_err() {
                    tracing::warn!("outbound queue full, dropped PONG");
                }
            }
            "RECONNECT" => {
                tracing::info!("twitch asked for a reconnect, closing chat connection");
                self.cancel.cancel();
            }
            "JOIN" | "PART" if msg.nick() == Some(self.username.as_str()) => {
                let op = if msg.command == "JOIN" { Op::Join } else { Op::Part };
                if let Some(channel) = msg.channel() {
                    self.resolve(op, channel, Ok(()));
                }
            }
            "NOTICE" => {
                let refused = msg
                    .tag("msg-id")
                    .is_some_and(|id| JOIN_REFUSALS.contains(&id));
                if let (true, Some(channel)) = (refused, msg.channel()) {
                    let reason = msg.trailing().unwrap_or("join refused").to_string();
                    self.resolve(Op::Join, channel, Err(Error::External(reason)));
                }
            }
            "PRIVMSG" => {
                let (Some(channel), Some(user), Some(text)) =
                    (msg.channel(), msg.nick(), msg.trailing())
                else {
                    return;
                };
                let _ = self.messages.send(ChatMessage {
                    channel: channel.to_string(),
                    user: user.to_string(),
                    text: text.to_string(),
                });
            }
            _ => {}
        }
    }

    fn resolve(&self, op: Op, channel: &str, outcome: Result<()>) {
        let waiter = match self.pending.lock() {
            Ok(mut map) => map.remove(&(op, normalize_channel(channel))),
            Err(_) => None,
        };
        if let Some(tx) = waiter {
            let _ = tx.send(outcome);
        }
    }

    fn fail_all_pending(&self) {
        let drained: Vec<_> = match self.pending.lock() {
            Ok(mut map) => map.drain().map(|(_, tx)| tx).collect(),
            Err(_) => Vec::new(),
        };
        for tx in drained {
            let _ = tx.send(Err(Error::External("chat connection closed".to_string())));
        }
    }
}

/// A logged-in Twitch chat connection. Dropping it closes the socket.
pub struct TwitchConnection {
    username: String,
    join_timeout: Duration,
    out: mpsc::Sender<String>,
    pending: Pending,
    messages: broadcast::Sender<ChatMessage>,
    cancel: CancellationToken,
}

impl TwitchConnection {
    async fn send_line(&self, line: String) -> Result<()> {
        if self.is_closed() {
            return Err(Error::External("chat connection closed".to_string()));
        }
        self.out
            .send(line)
            .await
            .map_err(|_| Error::External("chat connection closed".to_string()))
    }

    /// Send `line` and wait for the server to echo the membership change.
    async fn confirmed(&self, op: Op, channel: String, line: String) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| Error::External("pending map lock poisoned".to_string()))?
            .insert((op, channel.clone()), tx);

        if let Err(e) = self.send_line(line).await {
            self.forget(op, &channel);
            return Err(e);
        }

        match tokio::time::timeout(self.join_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::External("chat connection closed".to_string())),
            Err(_) => {
                self.forget(op, &channel);
                Err(Error::External("no response from twitch".to_string()))
            }
        }
    }

    fn forget(&self, op: Op, channel: &str) {
        if let Ok(mut map) = self.pending.lock() {
            map.remove(&(op, channel.to_string()));
        }
    }
}

impl Drop for TwitchConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl ChatConnection for TwitchConnection {
    fn username(&self) -> &str {
        &self.username
    }

    async fn join(&self, channel: &str) -> Result<()> {
        let channel = normalize_channel(channel);
        let line = format!("JOIN #{channel}");
        self.confirmed(Op::Join, channel, line).await
    }

    async fn part(&self, channel: &str) -> Result<()> {
        let channel = normalize_channel(channel);
        let line = format!("PART #{channel}");
        self.confirmed(Op::Part, channel, line).await
    }

    async fn say(&self, channel: &str, text: &str) -> Result<()> {
        let channel = normalize_channel(channel);
        // IRC lines cannot carry line breaks.
        let text = text.replace(['\r', '\n'], " ");
        self.send_line(format!("PRIVMSG #{channel} :{text}")).await
    }

    fn messages(&self) -> broadcast::Receiver<ChatMessage> {
        self.messages.subscribe()
    }

    fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn closed(&self) {
        self.cancel.cancelled().await
    }
}
