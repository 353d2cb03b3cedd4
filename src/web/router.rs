//! Web application router and middleware setup.

use crate::web::{handlers, websocket, AppState};
use axum::routing::{get, post};
use axum::Router;
use std::path::PathBuf;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use tracing::{info, warn};

/// Build the axum application with all routes and middleware.
pub fn create_app(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/api/monitoring-data", get(handlers::monitoring_data))
        .route("/api/system/info", get(handlers::system_info))
        .route("/api/system/monitor", post(handlers::monitor_control))
        .route("/ping", get(handlers::ping))
        .route("/ws", get(websocket::websocket_handler));

    match state.config.static_path.as_deref().map(PathBuf::from) {
        Some(dir) if dir.is_dir() => {
            info!("Serving static files from: {:?}", dir);
            let index = dir.join("index.html");
            app = if index.exists() {
                app.route_service("/", ServeFile::new(index))
            } else {
                app.route("/", get(handlers::default_index))
            };
            app = app.nest_service("/static", ServeDir::new(dir));
        }
        Some(dir) => {
            warn!("Static path {:?} does not exist, serving default index", dir);
            app = app.route("/", get(handlers::default_index));
        }
        None => {
            app = app.route("/", get(handlers::default_index));
        }
    }

    if state.config.enable_cors {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    app.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
