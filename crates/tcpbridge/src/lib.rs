//! Top-level facade crate for tcpbridge.
//!
//! Re-exports core types and the gateway library so users can depend on a single crate.

pub mod core {
    pub use tcpbridge_core::*;
}

pub mod gateway {
    pub use tcpbridge_gateway::*;
}
