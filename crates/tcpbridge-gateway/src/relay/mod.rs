//! Relay sessions: one WebSocket client ⇄ at most one remote TCP/TLS stream.
//!
//! - `session`: the command-driven state machine (connect/write/starttls/close)
//! - `pump`: the background task draining the remote into client events
//! - `link`: transport generations and the `Idle | Plaintext | Upgrading | Tls` states
//! - `mailbox`: per-session command queue serializing all commands

mod link;
mod mailbox;
mod pump;
mod session;

use tokio::sync::mpsc;

use tcpbridge_core::protocol::RelayEvent;

pub use link::{LinkSnapshot, LinkState};
pub use mailbox::RelayHandle;
pub use pump::PumpGauge;
pub use session::RelaySession;

/// One-way queue of events towards the client.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<RelayEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<RelayEvent>) -> Self {
        Self { tx }
    }

    /// Queue an event. Returns false once the client side is gone.
    pub async fn emit(&self, ev: RelayEvent) -> bool {
        self.tx.send(ev).await.is_ok()
    }
}
