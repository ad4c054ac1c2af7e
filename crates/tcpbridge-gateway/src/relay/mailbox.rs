use tokio::sync::mpsc::{self, Permit};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tcpbridge_core::error::{BridgeError, Result};
use tcpbridge_core::protocol::Command;

use super::RelaySession;

/// Mailbox of a running [`RelaySession`].
///
/// Commands are queued and executed one at a time, in arrival order, by a
/// single task that owns the session. Senders wait while the mailbox is full;
/// commands are never dropped. Stopping the mailbox (explicitly, via the stop
/// token, or by dropping every sender) interrupts the running command and runs
/// cleanup before the task ends.
pub struct RelayHandle {
    tx: mpsc::Sender<Command>,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl RelayHandle {
    pub fn spawn(session: RelaySession, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stop = CancellationToken::new();
        let task = tokio::spawn(run(session, rx, stop.clone()));
        Self { tx, stop, task }
    }

    /// Queue a command, waiting while the mailbox is full.
    pub async fn send(&self, cmd: Command) -> Result<()> {
        self.tx.send(cmd).await.map_err(|_| stopped())
    }

    /// Wait for room in the mailbox. The command stays with the caller until
    /// the permit is used, so a cancelled wait loses nothing.
    pub async fn reserve(&self) -> Result<Permit<'_, Command>> {
        self.tx.reserve().await.map_err(|_| stopped())
    }

    /// Token that stops this session when cancelled.
    pub fn stopper(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the session and wait for its cleanup to finish.
    pub async fn shutdown(self) {
        self.stop.cancel();
        drop(self.tx);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "relay mailbox task failed");
        }
    }
}

async fn run(mut session: RelaySession, mut rx: mpsc::Receiver<Command>, stop: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            cmd = rx.recv() => {
                let Some(cmd) = cmd else { break };
                // A command stuck on the remote must not hold off the stop.
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => {
                        tracing::debug!(session = %session.id(), "stop interrupted a running command");
                        break;
                    }
                    _ = session.dispatch(cmd) => {}
                }
            }
        }
    }

    session.cleanup().await;
    tracing::debug!(session = %session.id(), "relay session stopped");
}

fn stopped() -> BridgeError {
    BridgeError::Internal("relay session stopped".into())
}
