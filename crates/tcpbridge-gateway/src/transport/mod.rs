//! Transport layer (WebSocket).
//!
//! Exposes the WS upgrade handler and the codec that turns client frames into
//! relay commands before they reach the session mailbox.

pub mod codec;
pub mod ws;
