//! # Cinema Telemetry
//!
//! Live CPU temperature and memory telemetry for the machine that runs the
//! movie-night kiosk, pushed to dashboards and phone widgets over WebSocket
//! and served to polling widgets over HTTP.
//!
//! The privileged hardware-monitoring utility that supplies the sensor values
//! only runs while someone is watching: the first subscriber starts it and
//! the last one to leave stops it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cinema_telemetry::{start_web_server, MonitorConfig, TelemetryService, WebConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = TelemetryService::new(MonitorConfig::default());
//!     start_web_server(WebConfig::default(), service).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod metrics;
pub mod service;
pub mod state;
pub mod web;

// Re-export public API
pub use error::{Result, TelemetryError};
pub use metrics::{
    DeviceClass, LaunchOutcome, MemoryTriple, MonitorConfig, PollingCache, ProcessManager,
    SensorRead, SensorReader, SensorReading, SourceMethod, Subscriber, SubscriberId,
    TerminateOutcome,
};
pub use service::TelemetryService;
pub use state::SubscriberCount;
pub use web::{start_web_server, WebConfig};

/// The default web server port
pub const DEFAULT_WEB_PORT: u16 = 3060;

/// Sensor polling period in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Liveness sweep period in milliseconds
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 30_000;

/// Snapshot cadence for desktop subscribers in milliseconds
pub const DEFAULT_CADENCE_MS: u64 = 2_000;

/// Snapshot cadence for mobile subscribers in milliseconds
pub const MOBILE_CADENCE_MS: u64 = 5_000;

/// Number of samples kept for the widget charts
pub const HISTORY_LEN: usize = 60;
