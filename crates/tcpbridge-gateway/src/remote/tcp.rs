use async_trait::async_trait;
use tokio::net::TcpStream;

use tcpbridge_core::error::{BridgeError, Result};

use super::{Connector, RemoteStream, Target, TlsClient, TlsMode};
use crate::config::TlsSection;

/// Production connector: tokio TCP + rustls.
pub struct TcpConnector {
    tls: TlsClient,
}

impl TcpConnector {
    pub fn new(cfg: &TlsSection) -> Result<Self> {
        let tls = if cfg.accept_invalid_certs {
            tracing::warn!("tls.accept_invalid_certs is enabled; server certificates are NOT verified");
            TlsClient::new_insecure()?
        } else {
            TlsClient::new()?
        };
        Ok(Self { tls })
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, target: &Target, mode: TlsMode) -> Result<RemoteStream> {
        let tcp = TcpStream::connect((target.host.as_str(), target.port))
            .await
            .map_err(|e| BridgeError::transport(&format!("TCP connect to {target} failed"), e))?;
        if let Err(e) = tcp.set_nodelay(true) {
            tracing::debug!(%target, error = %e, "set_nodelay failed");
        }

        match mode {
            TlsMode::Implicit => self.tls.handshake(Box::new(tcp), &target.host).await,
            TlsMode::None | TlsMode::DeferredUpgrade => Ok(Box::new(tcp)),
        }
    }

    async fn upgrade(&self, stream: RemoteStream, target: &Target) -> Result<RemoteStream> {
        self.tls.handshake(stream, &target.host).await
    }
}
