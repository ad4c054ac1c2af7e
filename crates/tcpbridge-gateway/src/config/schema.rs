use serde::Deserialize;
use tcpbridge_core::error::{BridgeError, Result};

use crate::remote::TlsMode;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    pub version: u32,

    #[serde(default)]
    pub gateway: GatewaySection,

    #[serde(default)]
    pub relay: RelaySection,

    #[serde(default)]
    pub tls: TlsSection,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            version: 1,
            gateway: GatewaySection::default(),
            relay: RelaySection::default(),
            tls: TlsSection::default(),
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(BridgeError::Config(format!(
                "unsupported config version {} (expected 1)",
                self.version
            )));
        }

        self.gateway.validate()?;
        self.relay.validate()?;

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewaySection {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Largest accepted client frame. Base64 inflates writes by 4/3.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Capacity of the per-session event queue towards the client.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            ping_interval_ms: default_ping_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            max_frame_bytes: default_max_frame_bytes(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

impl GatewaySection {
    pub fn validate(&self) -> Result<()> {
        if !(5000..=120000).contains(&self.ping_interval_ms) {
            return Err(BridgeError::Config(
                "gateway.ping_interval_ms must be between 5000 and 120000".into(),
            ));
        }
        if !(10000..=600000).contains(&self.idle_timeout_ms) {
            return Err(BridgeError::Config(
                "gateway.idle_timeout_ms must be between 10000 and 600000".into(),
            ));
        }
        if self.idle_timeout_ms <= self.ping_interval_ms {
            return Err(BridgeError::Config(
                "gateway.idle_timeout_ms must be greater than ping_interval_ms".into(),
            ));
        }
        if !(1024..=16 * 1024 * 1024).contains(&self.max_frame_bytes) {
            return Err(BridgeError::Config(
                "gateway.max_frame_bytes must be between 1024 and 16777216".into(),
            ));
        }
        if self.outbound_queue == 0 {
            return Err(BridgeError::Config("gateway.outbound_queue must be > 0".into()));
        }
        Ok(())
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".into()
}
fn default_ping_interval_ms() -> u64 {
    20000
}
fn default_idle_timeout_ms() -> u64 {
    60000
}
fn default_max_frame_bytes() -> usize {
    1024 * 1024
}
fn default_outbound_queue() -> usize {
    1024
}

/// Whether `tcp_starttls` is allowed on connections that never declared
/// upgrade intent (port not in `starttls_ports`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartTlsPolicy {
    /// Any plaintext connection may be upgraded.
    #[default]
    Any,
    /// Only connections opened on a `starttls_ports` entry.
    Declared,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelaySection {
    /// Ports that speak TLS from the first byte (SMTPS).
    #[serde(default = "default_implicit_tls_ports")]
    pub implicit_tls_ports: Vec<u16>,

    /// Ports opened in plaintext with a later STARTTLS expected (submission).
    #[serde(default = "default_starttls_ports")]
    pub starttls_ports: Vec<u16>,

    #[serde(default)]
    pub starttls_policy: StartTlsPolicy,

    #[serde(default = "default_read_buffer_bytes")]
    pub read_buffer_bytes: usize,

    /// Pending commands per session before the client reader is paused.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            implicit_tls_ports: default_implicit_tls_ports(),
            starttls_ports: default_starttls_ports(),
            starttls_policy: StartTlsPolicy::default(),
            read_buffer_bytes: default_read_buffer_bytes(),
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

impl RelaySection {
    pub fn validate(&self) -> Result<()> {
        if let Some(p) = self
            .implicit_tls_ports
            .iter()
            .find(|p| self.starttls_ports.contains(p))
        {
            return Err(BridgeError::Config(format!(
                "relay: port {p} is listed in both implicit_tls_ports and starttls_ports"
            )));
        }
        if !(512..=1024 * 1024).contains(&self.read_buffer_bytes) {
            return Err(BridgeError::Config(
                "relay.read_buffer_bytes must be between 512 and 1048576".into(),
            ));
        }
        if self.mailbox_capacity == 0 {
            return Err(BridgeError::Config("relay.mailbox_capacity must be > 0".into()));
        }
        Ok(())
    }

    /// TLS mode used when connecting to `port`.
    pub fn tls_mode_for(&self, port: u16) -> TlsMode {
        if self.implicit_tls_ports.contains(&port) {
            TlsMode::Implicit
        } else if self.starttls_ports.contains(&port) {
            TlsMode::DeferredUpgrade
        } else {
            TlsMode::None
        }
    }
}

fn default_implicit_tls_ports() -> Vec<u16> {
    vec![465]
}
fn default_starttls_ports() -> Vec<u16> {
    vec![587]
}
fn default_read_buffer_bytes() -> usize {
    16 * 1024
}
fn default_mailbox_capacity() -> usize {
    64
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsSection {
    /// Skip server certificate verification. Test environments only.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}
