//! Lightweight in-process metrics (dependency-free).
//!
//! Counters, gauges and histograms are stored as atomics and rendered in
//! Prometheus text format by the `/metrics` handler.

pub mod metrics;

pub use metrics::GatewayMetrics;
