//! Inbound client commands.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::Deserialize;

use crate::error::{BridgeError, Result};

/// A decoded client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open an outbound connection.
    Connect { host: String, port: u16 },
    /// Raw bytes for the remote, already base64-decoded.
    Write(Bytes),
    /// Upgrade the open plaintext connection to TLS.
    StartTls,
    /// Tear down the remote connection.
    Close,
    /// Any other `type`; carried so the relay can report it by name.
    Unknown(String),
}

impl Command {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Command::Connect { .. } => "connect",
            Command::Write(_) => "write",
            Command::StartTls => "starttls",
            Command::Close => "close",
            Command::Unknown(_) => "unknown",
        }
    }
}

#[derive(Deserialize)]
struct Head {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct ConnectBody {
    host: String,
    port: u16,
}

#[derive(Deserialize)]
struct WriteBody {
    data: String,
}

/// Decode one text frame into a [`Command`].
///
/// Only the `type` header is required up front; the body is parsed according
/// to it. Unknown types are not an error here.
pub fn decode_command(text: &str) -> Result<Command> {
    let head: Head = serde_json::from_str(text)
        .map_err(|e| BridgeError::BadRequest(format!("invalid message json: {e}")))?;

    match head.kind.as_str() {
        "tcp_connect" => {
            let body: ConnectBody = serde_json::from_str(text)
                .map_err(|e| BridgeError::BadRequest(format!("invalid tcp_connect: {e}")))?;
            if body.host.trim().is_empty() {
                return Err(BridgeError::BadRequest("tcp_connect: host must not be empty".into()));
            }
            Ok(Command::Connect { host: body.host, port: body.port })
        }
        "tcp_write" => {
            let body: WriteBody = serde_json::from_str(text)
                .map_err(|e| BridgeError::BadRequest(format!("invalid tcp_write: {e}")))?;
            let bytes = STANDARD
                .decode(body.data.as_bytes())
                .map_err(|e| BridgeError::BadRequest(format!("tcp_write: invalid base64: {e}")))?;
            Ok(Command::Write(Bytes::from(bytes)))
        }
        "tcp_starttls" => Ok(Command::StartTls),
        "tcp_close" => Ok(Command::Close),
        other => {
            tracing::debug!(kind = %other, "unrecognized command type");
            Ok(Command::Unknown(other.to_string()))
        }
    }
}

/// Encode a command back into its wire form. Used by client tooling and tests.
pub fn encode_command(cmd: &Command) -> String {
    match cmd {
        Command::Connect { host, port } => {
            serde_json::json!({ "type": "tcp_connect", "host": host, "port": port }).to_string()
        }
        Command::Write(bytes) => {
            serde_json::json!({ "type": "tcp_write", "data": STANDARD.encode(bytes) }).to_string()
        }
        Command::StartTls => serde_json::json!({ "type": "tcp_starttls" }).to_string(),
        Command::Close => serde_json::json!({ "type": "tcp_close" }).to_string(),
        Command::Unknown(kind) => serde_json::json!({ "type": kind }).to_string(),
    }
}
