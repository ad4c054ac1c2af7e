//! Outbound relay events.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// An event emitted by a relay session towards its client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    ConnectSuccess,
    /// One chunk read from the remote, in arrival order.
    Data(Bytes),
    /// The remote closed its side (EOF).
    Closed,
    StartTlsSuccess,
    Error(String),
}

/// JSON shape of [`RelayEvent`].
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum Frame {
    #[serde(rename = "tcp_connect_success")]
    ConnectSuccess,
    #[serde(rename = "tcp_data")]
    Data { data: String },
    #[serde(rename = "tcp_closed")]
    Closed,
    #[serde(rename = "tcp_starttls_success")]
    StartTlsSuccess,
    #[serde(rename = "tcp_error")]
    Error { error: String },
}

impl RelayEvent {
    /// Wire `type` of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayEvent::ConnectSuccess => "tcp_connect_success",
            RelayEvent::Data(_) => "tcp_data",
            RelayEvent::Closed => "tcp_closed",
            RelayEvent::StartTlsSuccess => "tcp_starttls_success",
            RelayEvent::Error(_) => "tcp_error",
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        RelayEvent::Error(msg.into())
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        let frame = match self {
            RelayEvent::ConnectSuccess => Frame::ConnectSuccess,
            RelayEvent::Data(b) => Frame::Data { data: STANDARD.encode(b) },
            RelayEvent::Closed => Frame::Closed,
            RelayEvent::StartTlsSuccess => Frame::StartTlsSuccess,
            RelayEvent::Error(e) => Frame::Error { error: e.clone() },
        };
        serde_json::to_string(&frame).map_err(|e| BridgeError::Internal(format!("encode event: {e}")))
    }
}

/// Parse an outbound frame. The relay never needs this; clients and tests do.
pub fn decode_event(text: &str) -> Result<RelayEvent> {
    let frame: Frame = serde_json::from_str(text)
        .map_err(|e| BridgeError::BadRequest(format!("invalid event json: {e}")))?;
    Ok(match frame {
        Frame::ConnectSuccess => RelayEvent::ConnectSuccess,
        Frame::Data { data } => {
            let bytes = STANDARD
                .decode(data.as_bytes())
                .map_err(|e| BridgeError::BadRequest(format!("tcp_data: invalid base64: {e}")))?;
            RelayEvent::Data(Bytes::from(bytes))
        }
        Frame::Closed => RelayEvent::Closed,
        Frame::StartTlsSuccess => RelayEvent::StartTlsSuccess,
        Frame::Error { error } => RelayEvent::Error(error),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn unit_events_have_only_type() {
        assert_eq!(RelayEvent::Closed.to_json().unwrap(), r#"{"type":"tcp_closed"}"#);
        assert_eq!(
            RelayEvent::StartTlsSuccess.to_json().unwrap(),
            r#"{"type":"tcp_starttls_success"}"#
        );
    }

    #[test]
    fn data_is_base64() {
        let json = RelayEvent::Data(Bytes::from_static(b"220 ok\r\n")).to_json().unwrap();
        assert_eq!(json, r#"{"type":"tcp_data","data":"MjIwIG9rDQo="}"#);
    }
}
