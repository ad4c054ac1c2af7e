//! tcpbridge gateway library entry.
//!
//! Wires the WebSocket transport, session registry, relay sessions and the
//! outbound TCP/TLS connector into a runnable gateway. Consumed by the binary
//! (`main.rs`) and by integration tests.

pub mod app_state;
pub mod config;
pub mod obs;
pub mod ops;
pub mod relay;
pub mod remote;
pub mod router;
pub mod sessions;
pub mod transport;
