//! HTTP handlers for API endpoints.
//!
//! Sensor trouble never turns into an HTTP error here: every response is a
//! well-formed JSON body, degraded to cached or synthetic values as needed.

use crate::metrics::data::{format_temperature, MemoryTriple, SourceMethod};
use crate::metrics::process::{LaunchOutcome, TerminateOutcome};
use crate::metrics::sources::OsNativeSource;
use crate::web::AppState;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

/// Body of `GET /api/monitoring-data`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringData {
    /// `success`, `cached` or `fallback`
    pub status: &'static str,
    pub timestamp: i64,
    pub cpu_temp: String,
    pub mem_info: MemoryTriple,
    pub cpu_history: Vec<f64>,
    pub ram_history: Vec<f64>,
}

/// Hardware metrics for polling widgets.
pub async fn monitoring_data(State(state): State<AppState>) -> Response {
    let cache = state.service.cache();
    let latest = cache.latest();

    let (status, temperature, memory) = if !latest.is_unavailable() {
        ("success", latest.temperature_celsius, latest.memory)
    } else if let Some(scratch) = cache.read_scratch().await {
        ("cached", scratch.temperature_celsius, scratch.memory)
    } else {
        ("fallback", None, None)
    };

    let mem_info = match memory {
        Some(memory) => memory,
        None => OsNativeSource::memory().await.unwrap_or(MemoryTriple {
            total: 0.0,
            free: 0.0,
            used: 0.0,
        }),
    };
    let (cpu_history, ram_history) = cache.history();

    let body = MonitoringData {
        status,
        timestamp: Utc::now().timestamp_millis(),
        cpu_temp: format_temperature(temperature),
        mem_info,
        cpu_history,
        ram_history,
    };
    no_cache(Json(body).into_response())
}

fn no_cache(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    response
}

/// Current reading plus how it was obtained.
pub async fn system_info(State(state): State<AppState>) -> Json<Value> {
    let cache = state.service.cache();
    let latest = cache.latest();
    let method = match cache.reader().current_method().await {
        Some(method) => method,
        None if latest.source_method != SourceMethod::Unavailable => {
            latest.source_method.describe().to_string()
        }
        None => "Acquisition method not available yet".to_string(),
    };

    Json(json!({
        "status": "success",
        "temperature": latest.cpu_temp_display(),
        "memory": latest.memory,
        "method": method,
        "timestamp": Utc::now().timestamp_millis(),
    }))
}

/// Body of `POST /api/system/monitor`.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorAction {
    pub action: String,
}

/// Manual start/stop of the sensor utility.
pub async fn monitor_control(
    State(state): State<AppState>,
    Json(request): Json<MonitorAction>,
) -> Response {
    let registry = state.service.registry();
    match request.action.as_str() {
        "start" => {
            let outcome = registry.start_monitoring().await;
            info!("manual monitor start: {:?}", outcome);
            let reached = registry.broadcast(event("monitorStarted")).await;
            let (status, message) = match outcome {
                LaunchOutcome::AlreadyRunning => ("success", "Sensor utility already running".to_string()),
                LaunchOutcome::Launched { .. } => ("success", "Sensor utility started".to_string()),
                LaunchOutcome::Failed { reason } => ("error", reason),
            };
            Json(json!({ "status": status, "message": message, "notified": reached })).into_response()
        }
        "stop" => {
            let outcome = registry.stop_monitoring().await;
            info!("manual monitor stop: {:?}", outcome);
            let reached = registry.broadcast(event("monitorStopped")).await;
            let message = match outcome {
                TerminateOutcome::NotRunning => "Sensor utility was not running".to_string(),
                TerminateOutcome::Terminated { .. } => "Sensor utility stopped".to_string(),
                TerminateOutcome::Failed { reason } => reason,
            };
            Json(json!({ "status": "success", "message": message, "notified": reached })).into_response()
        }
        other => {
            warn!("unknown monitor action: {}", other);
            (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "status": "error",
                    "message": format!("Unknown action '{}', expected 'start' or 'stop'", other),
                })),
            )
                .into_response()
        }
    }
}

fn event(name: &str) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("event".to_string(), Value::String(name.to_string()));
    fields
}

/// Health check endpoint.
pub async fn ping() -> Json<Value> {
    Json(json!({
        "status": "success",
        "message": "cinema telemetry is running",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().timestamp_millis(),
    }))
}

/// Serve the dashboard page when no static directory is configured.
pub async fn default_index() -> Html<&'static str> {
    Html(DEFAULT_INDEX_HTML)
}

const DEFAULT_INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Cinema Telemetry</title>
    <style>
        body { font-family: -apple-system, 'Segoe UI', Roboto, sans-serif; background: #111; color: #eee; padding: 24px; }
        .card { background: #1d1d1d; border-radius: 12px; padding: 20px; max-width: 420px; margin: 0 auto 16px; }
        .metric { display: flex; justify-content: space-between; padding: 8px 0; border-bottom: 1px solid #333; }
        .metric:last-child { border-bottom: none; }
        .value { font-weight: bold; }
        #status { text-align: center; opacity: 0.7; }
    </style>
</head>
<body>
    <div class="card">
        <h2>Server</h2>
        <div class="metric"><span>CPU temperature</span><span class="value" id="cpu-temp">N/A</span></div>
        <div class="metric"><span>Memory used</span><span class="value" id="mem-used">N/A</span></div>
        <div class="metric"><span>Memory free</span><span class="value" id="mem-free">N/A</span></div>
    </div>
    <div id="status">Connecting...</div>
    <script>
        function connect() {
            const protocol = window.location.protocol === 'https:' ? 'wss:' : 'ws:';
            const ws = new WebSocket(`${protocol}//${window.location.host}/ws`);
            ws.onopen = () => {
                document.getElementById('status').textContent = 'Live';
                const mobile = /Mobi|Android/i.test(navigator.userAgent);
                ws.send(JSON.stringify({ type: 'clientConnected', clientType: 'dashboard', deviceType: mobile ? 'mobile' : 'desktop' }));
                ws.send(JSON.stringify({ type: 'requestData' }));
            };
            ws.onmessage = (event) => {
                const data = JSON.parse(event.data);
                if (data.type !== 'systemData') return;
                document.getElementById('cpu-temp').textContent = data.cpuTemp === 'N/A' ? 'N/A' : `${data.cpuTemp} °C`;
                if (data.memInfo) {
                    document.getElementById('mem-used').textContent = `${data.memInfo.used.toFixed(1)} GB`;
                    document.getElementById('mem-free').textContent = `${data.memInfo.free.toFixed(1)} GB`;
                }
            };
            ws.onclose = () => {
                document.getElementById('status').textContent = 'Disconnected, retrying...';
                setTimeout(connect, 3000);
            };
        }
        connect();
    </script>
</body>
</html>"#;
