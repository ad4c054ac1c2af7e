//! Shared error type across tcpbridge crates.

use thiserror::Error;

/// Client-facing error codes (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCode {
    /// Invalid input / malformed message.
    BadRequest,
    /// Command needs a remote connection but the session is idle.
    NotConnected,
    /// `tcp_connect` while a remote connection is already open.
    AlreadyConnected,
    /// Command is not valid for the current link state.
    InvalidState,
    /// Remote connect/read/write failure.
    Transport,
    /// TLS setup or handshake failure.
    Tls,
    /// Invalid configuration.
    Config,
    /// Internal server error.
    Internal,
}

impl ClientCode {
    /// String representation used in logs and metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            ClientCode::BadRequest => "BAD_REQUEST",
            ClientCode::NotConnected => "NOT_CONNECTED",
            ClientCode::AlreadyConnected => "ALREADY_CONNECTED",
            ClientCode::InvalidState => "INVALID_STATE",
            ClientCode::Transport => "TRANSPORT",
            ClientCode::Tls => "TLS",
            ClientCode::Config => "CONFIG",
            ClientCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Unified error type used by core and gateway.
///
/// `Display` is what the client sees in `tcp_error.error`, so the relay's
/// protocol-misuse variants carry the exact user-facing sentence.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{0}")]
    NotConnected(&'static str),
    #[error("Already connected")]
    AlreadyConnected,
    #[error("{0}")]
    InvalidState(String),
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("{0}")]
    Transport(String),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Map internal error to a stable client-facing code.
    pub fn client_code(&self) -> ClientCode {
        match self {
            BridgeError::BadRequest(_) => ClientCode::BadRequest,
            BridgeError::NotConnected(_) => ClientCode::NotConnected,
            BridgeError::AlreadyConnected => ClientCode::AlreadyConnected,
            BridgeError::InvalidState(_) => ClientCode::InvalidState,
            BridgeError::UnknownCommand(_) => ClientCode::BadRequest,
            BridgeError::Transport(_) => ClientCode::Transport,
            BridgeError::Tls(_) => ClientCode::Tls,
            BridgeError::Config(_) => ClientCode::Config,
            BridgeError::Internal(_) => ClientCode::Internal,
        }
    }

    /// Whether this error leaves the session untouched (protocol misuse)
    /// rather than forcing a full teardown.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BridgeError::BadRequest(_)
                | BridgeError::NotConnected(_)
                | BridgeError::AlreadyConnected
                | BridgeError::InvalidState(_)
                | BridgeError::UnknownCommand(_)
        )
    }

    pub fn transport(ctx: &str, e: impl std::fmt::Display) -> Self {
        BridgeError::Transport(format!("{ctx}: {e}"))
    }
}
