//! WebSocket handler for live telemetry.

use crate::metrics::data::{DeviceClass, SubscriberId};
use crate::service::TelemetryService;
use crate::web::messages::{ClientMessage, ServerMessage};
use crate::web::transport::{ChannelTransport, Transport};
use crate::web::AppState;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{header::SEC_WEBSOCKET_KEY, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// WebSocket upgrade handler.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let active = state.service.registry().count().get();
    if active >= state.config.max_websocket_connections {
        warn!("refusing WebSocket upgrade, {} connections already open", active);
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    }

    let id = headers
        .get(SEC_WEBSOCKET_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| SubscriberId::random().0);

    let service = state.service.clone();
    ws.on_upgrade(move |socket| handle_websocket(socket, service, id))
}

async fn handle_websocket(socket: WebSocket, service: TelemetryService, id: String) {
    let (mut sender, mut receiver) = socket.split();
    let (transport, mut outbound) = ChannelTransport::new(id);
    let transport = Arc::new(transport);

    // The writer ends when every transport handle is gone or the socket
    // refuses a frame; either way the transport then reads as closed.
    tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if let Err(e) = sender.send(Message::Text(text)).await {
                debug!("WebSocket write failed: {}", e);
                break;
            }
        }
        let _ = sender.close().await;
    });

    let subscriber = service
        .registry()
        .register(transport.clone(), DeviceClass::Desktop)
        .await;
    let subscriber_id = subscriber.id;
    info!("WebSocket client connected: {}", subscriber_id);

    loop {
        tokio::select! {
            _ = transport.closed() => {
                debug!("transport {} closed by server", subscriber_id);
                break;
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    handle_client_text(&service, &subscriber_id, transport.as_ref(), &text).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error for client {}: {}", subscriber_id, e);
                    break;
                }
            }
        }
    }

    transport.close();
    service.registry().unregister(&subscriber_id).await;
    info!("WebSocket client disconnected: {}", subscriber_id);
}

/// React to one text frame from a client. Unknown or malformed messages are
/// ignored.
pub async fn handle_client_text(
    service: &TelemetryService,
    id: &SubscriberId,
    transport: &dyn Transport,
    text: &str,
) {
    let Some(message) = ClientMessage::parse(text) else {
        debug!("ignoring unrecognised message from {}", id);
        return;
    };

    match message {
        ClientMessage::Ping => match ServerMessage::pong().to_json() {
            Ok(json) if transport.is_open() => {
                let _ = transport.send_text(json);
            }
            Ok(_) => {}
            Err(e) => warn!("could not serialize pong: {}", e),
        },
        ClientMessage::RequestData => {
            service.scheduler().send_now(transport).await;
        }
        ClientMessage::ClientConnected {
            client_type,
            device_type,
        } => {
            let device = [device_type, client_type]
                .iter()
                .flatten()
                .map(|hint| DeviceClass::from_hint(hint))
                .find(|d| *d == DeviceClass::Mobile)
                .unwrap_or_default();
            service.registry().announce_device(id, device).await;
        }
    }
}
