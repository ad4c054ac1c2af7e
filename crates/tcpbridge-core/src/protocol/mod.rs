//! Client ⇄ relay wire protocol (JSON text frames).
//!
//! - Inbound: `tcp_connect`, `tcp_write`, `tcp_starttls`, `tcp_close`.
//! - Outbound: `tcp_connect_success`, `tcp_data`, `tcp_closed`,
//!   `tcp_starttls_success`, `tcp_error`.
//!
//! Byte payloads travel as standard (padded) base64. Parsers are panic-free:
//! malformed input is reported as `BridgeError::BadRequest`.

pub mod inbound;
pub mod outbound;

pub use inbound::{decode_command, Command};
pub use outbound::{decode_event, RelayEvent};
