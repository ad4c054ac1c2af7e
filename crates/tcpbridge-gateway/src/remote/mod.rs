//! Outbound transport provider.
//!
//! A [`Connector`] opens the remote stream for a session and, on request,
//! upgrades an already-open plaintext stream to TLS over the same socket.
//! Streams are boxed so plaintext and TLS generations share one type.

mod tcp;
mod tls;

use std::fmt;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use tcpbridge_core::error::Result;

pub use tcp::TcpConnector;
pub use tls::TlsClient;

/// Byte stream to the remote peer.
pub trait RemoteIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> RemoteIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type RemoteStream = Box<dyn RemoteIo>;

/// How TLS is applied to a new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// Plaintext.
    None,
    /// TLS from the first byte.
    Implicit,
    /// Plaintext now, `upgrade` expected later (STARTTLS).
    DeferredUpgrade,
}

impl TlsMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TlsMode::None => "none",
            TlsMode::Implicit => "implicit",
            TlsMode::DeferredUpgrade => "deferred-upgrade",
        }
    }
}

/// `host:port` the client asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a stream to `target`. With [`TlsMode::Implicit`] the returned
    /// stream has already completed its TLS handshake.
    async fn connect(&self, target: &Target, mode: TlsMode) -> Result<RemoteStream>;

    /// Run a client TLS handshake over `stream` and return the encrypted
    /// stream. The caller must hold no other handle to `stream`.
    async fn upgrade(&self, stream: RemoteStream, target: &Target) -> Result<RemoteStream>;
}
