use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::time::{timeout, Instant};

use tcpbridge_core::error::{BridgeError, Result};
use tcpbridge_core::protocol::{Command, RelayEvent};

use super::link::{Link, LinkSnapshot, LinkState, Live};
use super::pump::{PumpGauge, ReadPump, Reader};
use super::EventSink;
use crate::config::{RelaySection, StartTlsPolicy};
use crate::obs::GatewayMetrics;
use crate::remote::{Connector, RemoteStream, Target, TlsMode};

/// Upper bound on the orderly writer shutdown during cleanup. A TLS writer
/// flushes `close_notify`, which stalls on a peer that stopped reading.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Per-client relay state machine.
///
/// Owns at most one remote transport and exactly one read pump for it. All
/// methods take `&mut self`; callers serialize commands (see `RelayHandle`).
pub struct RelaySession {
    id: Arc<str>,
    connector: Arc<dyn Connector>,
    settings: RelaySection,
    events: EventSink,
    metrics: Arc<GatewayMetrics>,
    link: Link,
    generation: u64,
    pumps: Arc<PumpGauge>,
}

impl RelaySession {
    pub fn new(
        id: impl Into<Arc<str>>,
        connector: Arc<dyn Connector>,
        settings: RelaySection,
        events: EventSink,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            id: id.into(),
            connector,
            settings,
            events,
            metrics,
            link: Link::Idle,
            generation: 0,
            pumps: Arc::new(PumpGauge::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> LinkState {
        self.link.state()
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        self.link.snapshot()
    }

    pub fn pump_gauge(&self) -> Arc<PumpGauge> {
        Arc::clone(&self.pumps)
    }

    /// Run one command to completion. Never fails: protocol misuse becomes an
    /// error event, anything else an error event followed by cleanup.
    pub async fn dispatch(&mut self, cmd: Command) {
        let label = cmd.label();
        self.metrics.relay_commands.inc(&[("cmd", label)]);

        let Err(e) = self.apply(cmd).await else {
            return;
        };

        self.metrics.relay_errors.inc(&[("code", e.client_code().as_str())]);
        if e.is_recoverable() {
            tracing::debug!(session = %self.id, cmd = label, error = %e, "command rejected");
            self.events.emit(RelayEvent::error(e.to_string())).await;
        } else {
            tracing::warn!(session = %self.id, cmd = label, error = %e, "command failed; tearing down remote");
            self.events.emit(RelayEvent::error(e.to_string())).await;
            self.cleanup().await;
        }
    }

    async fn apply(&mut self, cmd: Command) -> Result<()> {
        match cmd {
            Command::Connect { host, port } => self.connect(Target::new(host, port)).await,
            Command::Write(bytes) => self.write(&bytes).await,
            Command::StartTls => self.starttls().await,
            Command::Close => {
                self.cleanup().await;
                Ok(())
            }
            Command::Unknown(name) => Err(BridgeError::UnknownCommand(name)),
        }
    }

    async fn connect(&mut self, target: Target) -> Result<()> {
        if !matches!(self.link, Link::Idle) {
            return Err(BridgeError::AlreadyConnected);
        }

        let mode = self.settings.tls_mode_for(target.port);
        let started = Instant::now();
        let stream = self.connector.connect(&target, mode).await?;
        self.metrics
            .connect_duration
            .observe(&[("tls", mode.as_str())], started.elapsed());

        self.events.emit(RelayEvent::ConnectSuccess).await;
        let live = self.go_live(stream, target);
        tracing::info!(
            session = %self.id,
            generation = live.generation,
            target = %live.target,
            tls = mode.as_str(),
            "remote connected"
        );

        self.link = match mode {
            TlsMode::Implicit => Link::Tls { live },
            TlsMode::DeferredUpgrade => Link::Plaintext { live, upgrade_expected: true },
            TlsMode::None => Link::Plaintext { live, upgrade_expected: false },
        };
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let live = self
            .link
            .live_mut()
            .ok_or(BridgeError::NotConnected("Not connected"))?;

        live.writer
            .write_all(bytes)
            .await
            .map_err(|e| BridgeError::transport("TCP write failed", e))?;
        live.writer
            .flush()
            .await
            .map_err(|e| BridgeError::transport("TCP flush failed", e))?;
        Ok(())
    }

    async fn starttls(&mut self) -> Result<()> {
        match &self.link {
            Link::Idle | Link::Upgrading => {
                return Err(BridgeError::NotConnected("Not connected for STARTTLS"));
            }
            Link::Tls { .. } => {
                self.metrics.starttls.inc(&[("result", "rejected")]);
                return Err(BridgeError::InvalidState("TLS already active".into()));
            }
            Link::Plaintext { live, upgrade_expected } => {
                if !*upgrade_expected && self.settings.starttls_policy == StartTlsPolicy::Declared {
                    self.metrics.starttls.inc(&[("result", "rejected")]);
                    return Err(BridgeError::InvalidState(format!(
                        "STARTTLS not expected on port {}",
                        live.target.port
                    )));
                }
            }
        }

        let Link::Plaintext { live, .. } = std::mem::replace(&mut self.link, Link::Upgrading) else {
            return Err(BridgeError::Internal("link changed during STARTTLS".into()));
        };
        let Live { generation, target, writer, pump } = live;

        // No read may be in flight on the plaintext stream during the handshake.
        let reader = pump.stop().await?;
        if !reader.is_pair_of(&writer) {
            return Err(BridgeError::Internal(format!(
                "reader and writer of generation {generation} do not match"
            )));
        }
        let plain = reader.unsplit(writer);

        let tls = match self.connector.upgrade(plain, &target).await {
            Ok(s) => s,
            Err(e) => {
                self.metrics.starttls.inc(&[("result", "failed")]);
                return Err(e);
            }
        };
        self.metrics.starttls.inc(&[("result", "ok")]);

        self.events.emit(RelayEvent::StartTlsSuccess).await;
        let live = self.go_live(tls, target);
        tracing::info!(
            session = %self.id,
            from = generation,
            generation = live.generation,
            "STARTTLS complete"
        );
        self.link = Link::Tls { live };
        Ok(())
    }

    /// Tear down the remote link. Safe to call in any state.
    pub async fn cleanup(&mut self) {
        match self.link.take() {
            Link::Idle => {}
            Link::Upgrading => {
                tracing::debug!(session = %self.id, "cleanup during upgrade; stream already released");
            }
            Link::Plaintext { live, .. } | Link::Tls { live } => {
                let Live { generation, target, mut writer, pump } = live;

                let reader: Option<Reader> = match pump.stop().await {
                    Ok(r) => Some(r),
                    Err(e) => {
                        tracing::debug!(session = %self.id, generation, error = %e, "ignoring pump stop failure");
                        None
                    }
                };
                match timeout(SHUTDOWN_GRACE, writer.shutdown()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::debug!(session = %self.id, generation, error = %e, "ignoring writer shutdown failure");
                    }
                    Err(_) => {
                        tracing::debug!(session = %self.id, generation, "writer shutdown timed out; dropping stream");
                    }
                }
                drop(reader);
                drop(writer);

                tracing::info!(session = %self.id, generation, %target, "remote connection closed");
            }
        }
    }

    /// Split a fresh stream into the next generation and start its pump.
    fn go_live(&mut self, stream: RemoteStream, target: Target) -> Live {
        self.generation += 1;
        let (reader, writer) = tokio::io::split(stream);
        let pump = ReadPump::spawn(
            reader,
            self.generation,
            self.events.clone(),
            self.settings.read_buffer_bytes,
            &self.pumps,
        );
        Live {
            generation: self.generation,
            target,
            writer,
            pump,
        }
    }
}
