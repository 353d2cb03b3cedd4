//! Error types for the telemetry core.
//!
//! Nothing in this crate is fatal to the process. Sensor and subprocess
//! failures are normally converted into degraded outcomes long before they
//! reach a transport, but the variants below give those failures a name so
//! they can be logged and asserted on.

use thiserror::Error;

/// Convenient result alias used across the crate.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// All errors produced by the telemetry core.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A sensor could not be read right now. Always recoverable.
    #[error("sensor unavailable: {0}")]
    SensorUnavailable(String),

    /// The external sensor utility could not be launched.
    #[error("failed to launch sensor utility: {0}")]
    ProcessLaunchFailed(String),

    /// The sensor utility answered with something we could not parse.
    #[error("malformed sensor output: {0}")]
    MalformedSensorOutput(String),

    /// A write was attempted on a closed or closing transport.
    #[error("transport write failed: {0}")]
    TransportWriteFailed(String),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// The HTTP/WebSocket server failed.
    #[error("web server error: {0}")]
    WebServer(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TelemetryError {
    pub fn sensor_unavailable(msg: impl Into<String>) -> Self {
        Self::SensorUnavailable(msg.into())
    }

    pub fn launch_failed(msg: impl Into<String>) -> Self {
        Self::ProcessLaunchFailed(msg.into())
    }

    pub fn malformed_output(msg: impl Into<String>) -> Self {
        Self::MalformedSensorOutput(msg.into())
    }

    pub fn transport_write_failed(msg: impl Into<String>) -> Self {
        Self::TransportWriteFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn web_server_error(msg: impl Into<String>) -> Self {
        Self::WebServer(msg.into())
    }

    /// Whether this error is absorbed by degrading instead of being reported.
    pub fn is_degradation(&self) -> bool {
        matches!(
            self,
            Self::SensorUnavailable(_)
                | Self::MalformedSensorOutput(_)
                | Self::TransportWriteFailed(_)
        )
    }
}
