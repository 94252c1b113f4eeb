//! WebSocket transport for the realtime hub.

use axum::{
    body::Bytes,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{HeaderMap, Uri},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use trackmyorder_protocol::{ClientEvent, ServerEvent};

use crate::api::{ApiError, AppState};
use crate::auth::Claims;

use super::hub::{Delivery, Hub};

/// WebSocket upgrade handler.
///
/// GET /ws
///
/// A staff credential is optional; connections without one are anonymous
/// customers. A credential that is present but invalid rejects the upgrade.
pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let claims = state.auth.claims_from_request(&headers, &uri)?;
    if let Some(c) = &claims {
        info!("WebSocket upgrade request from staff {}", c.sub);
    }

    let hub = state.hub.clone();
    let ping_interval = Duration::from_secs(state.realtime.ping_interval_secs.max(1));

    Ok(ws.on_upgrade(move |socket| handle_ws_connection(socket, hub, claims, ping_interval)))
}

/// Drive one WebSocket connection until it closes.
async fn handle_ws_connection(
    socket: WebSocket,
    hub: Arc<Hub>,
    claims: Option<Claims>,
    ping_interval: Duration,
) {
    let (mut sender, mut receiver) = socket.split();
    let (session, mut events) = hub.register(claims);

    let send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        // The first tick completes immediately.
        ping.tick().await;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let json = match serde_json::to_string(&event) {
                        Ok(j) => j,
                        Err(e) => {
                            warn!("Failed to serialize {} event: {}", event.name(), e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }

                _ = ping.tick() => {
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Events from one connection are handled strictly in arrival order.
    while let Some(msg_result) = receiver.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(event) => hub.handle_event(session, event).await,
                Err(e) => {
                    warn!("Failed to parse event from {}: {}", session, e);
                    hub.deliver(vec![Delivery::to_session(
                        session,
                        ServerEvent::error(format!("Invalid event: {}", e)),
                    )]);
                }
            },
            Ok(Message::Binary(_)) => {
                debug!("Received binary message from {}, ignoring", session);
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                debug!("Connection {} sent close", session);
                break;
            }
            Err(e) => {
                warn!("WebSocket error for {}: {}", session, e);
                break;
            }
        }
    }

    hub.disconnect(&session);
    send_task.abort();
}
