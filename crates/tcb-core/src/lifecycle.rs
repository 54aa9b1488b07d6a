//! One-shot "session ready" signal.

use tokio::sync::oneshot;

use crate::{errors::Error, session::SessionHandle, Result};

/// Sending half, owned by the session manager.
#[derive(Debug)]
pub struct ReadyNotifier {
    tx: oneshot::Sender<SessionHandle>,
}

/// Receiving half, handed to exactly one listener.
#[derive(Debug)]
pub struct ReadyListener {
    rx: oneshot::Receiver<SessionHandle>,
}

pub fn ready_signal() -> (ReadyNotifier, ReadyListener) {
    let (tx, rx) = oneshot::channel();
    (ReadyNotifier { tx }, ReadyListener { rx })
}

impl ReadyNotifier {
    /// Fire the signal. Consuming `self` makes a second emission impossible.
    /// A listener that has gone away is not an error.
    pub fn notify(self, handle: SessionHandle) {
        let _ = self.tx.send(handle);
    }
}

impl ReadyListener {
    pub async fn wait(self) -> Result<SessionHandle> {
        self.rx.await.map_err(|_| Error::ReadySignalDropped)
    }
}
