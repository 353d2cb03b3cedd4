//! HTTP and WebSocket surface of the telemetry service.

pub mod broadcast;
pub mod config;
pub mod handlers;
pub mod messages;
pub mod registry;
pub mod router;
pub mod transport;
pub mod websocket;

// Re-export commonly used items
pub use config::WebConfig;
pub use registry::SubscriberRegistry;
pub use router::create_app;
pub use transport::{ChannelTransport, Transport};

use crate::error::{Result, TelemetryError};
use crate::service::TelemetryService;
use tracing::info;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: TelemetryService,
    pub config: WebConfig,
}

/// Serve until Ctrl-C, then shut the telemetry service down.
pub async fn start_web_server(config: WebConfig, service: TelemetryService) -> Result<()> {
    let addr = config.socket_addr()?;
    let app = create_app(AppState {
        service: service.clone(),
        config,
    });

    info!("Starting cinema telemetry on http://{}", addr);
    info!("Widget endpoint: http://{}/api/monitoring-data", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| TelemetryError::web_server_error(format!("Failed to bind to address: {}", e)))?;

    let sweeper = service.spawn_sweeper();

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| TelemetryError::web_server_error(format!("Server error: {}", e)));

    sweeper.abort();
    service.shutdown().await;
    served
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; run until the process is killed.
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
