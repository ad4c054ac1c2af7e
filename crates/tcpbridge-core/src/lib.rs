//! tcpbridge core: transport-agnostic wire protocol and error types.
//!
//! This crate defines the JSON messages exchanged between a browser-side
//! client and the relay, plus the error surface shared by the gateway. It has
//! no async runtime or socket code (only `tracing` for diagnostics), so client
//! tooling and tests can reuse it.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! Malformed frames surface as `BridgeError::BadRequest`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{BridgeError, Result};
