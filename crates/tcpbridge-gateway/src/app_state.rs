//! Shared application state for the tcpbridge gateway.

use std::sync::Arc;

use tcpbridge_core::error::Result;

use crate::config::BridgeConfig;
use crate::obs::GatewayMetrics;
use crate::remote::{Connector, TcpConnector};
use crate::sessions::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: BridgeConfig,
    connector: Arc<dyn Connector>,
    sessions: SessionRegistry,
    metrics: Arc<GatewayMetrics>,
}

impl AppState {
    /// Build application state with the production TCP/TLS connector.
    /// Returns Result so main can handle errors gracefully (no panic).
    pub fn new(cfg: BridgeConfig) -> Result<Self> {
        let connector = TcpConnector::new(&cfg.tls)?;
        Ok(Self::with_connector(cfg, Arc::new(connector)))
    }

    /// Build application state around any outbound connector.
    pub fn with_connector(cfg: BridgeConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                cfg,
                connector,
                sessions: SessionRegistry::new(),
                metrics: Arc::new(GatewayMetrics::default()),
            }),
        }
    }

    pub fn cfg(&self) -> &BridgeConfig {
        &self.inner.cfg
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::clone(&self.inner.connector)
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.inner.sessions
    }

    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    /// Series that are not owned by `GatewayMetrics`.
    pub fn metrics_extra(&self) -> Vec<(&'static str, u64)> {
        vec![("tcpbridge_sessions_registered", self.inner.sessions.len() as u64)]
    }

    pub fn is_draining(&self) -> bool {
        self.inner.metrics.is_draining()
    }

    /// Stop accepting sessions and stop the live ones.
    pub fn start_draining(&self) {
        self.inner.metrics.set_draining();
        self.inner.sessions.stop_all();
    }
}
