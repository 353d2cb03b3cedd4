//! Web server configuration.

use crate::error::{Result, TelemetryError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Configuration for the HTTP and WebSocket server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
    /// Directory holding the dashboard; `None` serves the built-in page
    pub static_path: Option<String>,
    /// Upgrades beyond this many open WebSockets are refused with 503
    pub max_websocket_connections: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: crate::DEFAULT_WEB_PORT,
            enable_cors: true,
            static_path: None,
            max_websocket_connections: 100,
        }
    }
}

impl WebConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_cors(mut self, enable_cors: bool) -> Self {
        self.enable_cors = enable_cors;
        self
    }

    pub fn with_static_path(mut self, path: Option<String>) -> Self {
        self.static_path = path;
        self
    }

    pub fn with_max_websocket_connections(mut self, max: usize) -> Self {
        self.max_websocket_connections = max;
        self
    }

    /// `host:port` string to bind to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validated socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        if self.max_websocket_connections == 0 {
            return Err(TelemetryError::config_error(
                "max_websocket_connections must be at least 1",
            ));
        }
        self.bind_address()
            .parse::<SocketAddr>()
            .map_err(|e| TelemetryError::config_error(format!("Invalid bind address: {}", e)))
    }
}
