//! Core server: accepts bridge clients and owns the connection registry.

use crate::bridge;
use crate::config::ServerConfig;
use crate::session::{ConnectionRegistry, Connector};
use crate::transport::websocket;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use webssh_core::{WebSshError, WebSshResult};

/// How often detached sessions are checked against the idle timeout.
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// The web SSH server instance.
pub struct WebSshServer {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
}

impl WebSshServer {
    pub fn new(config: ServerConfig, connector: Arc<dyn Connector>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(
            config.max_sessions,
            config.connection_settings(),
            connector,
        ));
        Self { config, registry }
    }

    /// Shared registry, for session creation outside the bridge.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// Listen for bridge clients until the listener fails.
    pub async fn run(&self) -> WebSshResult<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| WebSshError::Other(format!("invalid address: {e}")))?;

        let mut ws_rx = websocket::start_listener(addr, self.config.allowed_origins.clone()).await?;

        self.registry.spawn_reaper();

        if let Some(max_idle) = self.config.idle_timeout() {
            let gc_registry = Arc::downgrade(&self.registry);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(IDLE_SWEEP_INTERVAL);
                loop {
                    interval.tick().await;
                    let Some(registry) = gc_registry.upgrade() else {
                        break;
                    };
                    let reaped = registry.reap_idle(max_idle).await;
                    if !reaped.is_empty() {
                        info!(count = reaped.len(), "reaped idle sessions");
                    }
                }
            });
        }

        info!(
            addr = %addr,
            max_sessions = self.config.max_sessions,
            log_dir = %self.config.log_dir.display(),
            "web SSH server ready"
        );

        while let Some(conn) = ws_rx.recv().await {
            let registry = self.registry.clone();
            tokio::spawn(async move {
                let exit = bridge::serve(&registry, &conn.session_id, conn.ws_stream).await;
                debug!(remote = %conn.remote_addr, session_id = %conn.session_id, exit = ?exit, "bridge client finished");
            });
        }

        Err(WebSshError::Transport("WebSocket listener stopped".into()))
    }
}
