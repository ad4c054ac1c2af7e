//! Client-side TLS for remote streams.
//!
//! Wraps `tokio_rustls::TlsConnector`. Server certificates are checked against
//! the webpki root set; an insecure variant exists for test environments.

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};

use tcpbridge_core::error::{BridgeError, Result};

use super::RemoteStream;

#[derive(Clone)]
pub struct TlsClient {
    inner: tokio_rustls::TlsConnector,
}

impl TlsClient {
    /// Verifying client using the bundled webpki roots.
    pub fn new() -> Result<Self> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| BridgeError::Tls(format!("failed to set protocol versions: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(Self {
            inner: tokio_rustls::TlsConnector::from(Arc::new(config)),
        })
    }

    /// Client that accepts any server certificate.
    pub fn new_insecure() -> Result<Self> {
        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| BridgeError::Tls(format!("failed to set protocol versions: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoCertificateVerification))
        .with_no_client_auth();

        Ok(Self {
            inner: tokio_rustls::TlsConnector::from(Arc::new(config)),
        })
    }

    /// Handshake over `stream`; `host` is used for SNI and verification.
    pub async fn handshake(&self, stream: RemoteStream, host: &str) -> Result<RemoteStream> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| BridgeError::Tls(format!("invalid server name: {host}")))?;

        let tls = self
            .inner
            .connect(server_name, stream)
            .await
            .map_err(|e| BridgeError::Tls(format!("handshake with {host} failed: {e}")))?;
        Ok(Box::new(tls))
    }
}

#[derive(Debug)]
struct NoCertificateVerification;

impl rustls::client::danger::ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
