//! WebSocket endpoint for real-time notifications.
//!
//! Browsers cannot attach an Authorization header to a WebSocket upgrade,
//! so the access token travels as a `token` query parameter and is
//! validated here instead of in the auth middleware. Each connection joins
//! its organization's broadcast channel and receives the frames the
//! [`Hub`](crate::notify::Hub) publishes, plus the periodic heartbeat.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use invoiceflow_shared::auth::jwt;

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::notify::WsEvent;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: String,
}

/// Upgrades the connection after validating the access token.
///
/// # Endpoints
///
/// `GET /v1/ws?token=<access token>`
///
/// # Errors
///
/// Returns 401 before the upgrade when the token is missing, expired, or
/// not an access token.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let claims = jwt::validate_access_token(&query.token, state.jwt_secret())
        .map_err(ApiError::from)?;

    let user_id = claims.sub;
    let organization_id = claims.organization_id;

    Ok(ws.on_upgrade(move |socket| handle_socket(state, socket, user_id, organization_id)))
}

async fn handle_socket(
    state: AppState,
    mut socket: WebSocket,
    user_id: Uuid,
    organization_id: Uuid,
) {
    let mut receiver = state.hub.subscribe(organization_id).await;

    info!(%user_id, %organization_id, "websocket connected");

    let hello = json!({
        "event": WsEvent::ConnectionEstablished.as_str(),
        "timestamp": Utc::now().to_rfc3339(),
        "data": {"user_id": user_id, "organization_id": organization_id},
    });
    if socket.send(Message::Text(hello.to_string())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            broadcast = receiver.recv() => {
                match broadcast {
                    Ok(frame) => {
                        if socket.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    // Slow consumer fell behind the ring buffer. Skip the
                    // lost frames and keep the connection alive.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(%organization_id, skipped, "websocket client lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    info!(%user_id, %organization_id, "websocket disconnected");
}
