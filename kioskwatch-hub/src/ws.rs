//! Signaling WebSocket handler.
//!
//! Authentication happens before the upgrade: the handshake must carry a
//! client identity token via the `Authorization: Bearer` header
//! (preferred) or the `?token=` query parameter (browser clients; the
//! token value may appear in logs and history).
//!
//! Each accepted socket gets a bounded outbound channel drained by a
//! writer task. The signaling service enqueues events with `try_send`, so
//! a stuck client loses events instead of stalling the hub.

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use kioskwatch_core::models::{ClientRole, ConnectionId};
use kioskwatch_core::protocol::{ClientCommand, ErrorCode, ServerEvent};
use kioskwatch_core::service::ClientContext;

use crate::http::auth::bearer_token;
use crate::http::{AppError, AppState};

/// Outbound queue depth per connection; beyond this the client is
/// considered stuck and events are dropped
const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Signaling frames are small JSON objects
const MAX_MESSAGE_SIZE: usize = 16 * 1024;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Client identity token (fallback for browser clients)
    pub token: Option<String>,
}

/// `GET /ws` — authenticate, then upgrade
pub async fn websocket_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    let token = bearer_token(&headers)
        .map(str::to_owned)
        .or(query.token)
        .ok_or_else(|| AppError::unauthorized("Missing authentication token"))?;

    let claims = state
        .tokens
        .verify_client_token(&token)
        .map_err(|e| AppError::unauthorized(format!("Invalid token: {e}")))?;
    let role = claims
        .role()
        .map_err(|e| AppError::unauthorized(format!("Invalid token: {e}")))?;
    let client_id = claims.client_id;

    Ok(ws
        .max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state, client_id, role)))
}

async fn handle_socket(
    socket: axum::extract::ws::WebSocket,
    state: AppState,
    client_id: String,
    role: ClientRole,
) {
    let connection_id = ConnectionId::generate();
    let (tx, mut rx) = tokio::sync::mpsc::channel::<ServerEvent>(OUTBOUND_QUEUE_CAPACITY);

    let ctx = ClientContext {
        client_id: client_id.clone(),
        role,
        connection_id: connection_id.clone(),
        sender: tx,
    };

    info!(
        client_id = %client_id,
        role = %role,
        connection_id = %connection_id,
        "Signaling connection established"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: serialize queued events onto the socket
    let writer_client = client_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    error!(client_id = %writer_client, error = %err, "Failed to encode event");
                    continue;
                }
            };
            if ws_tx
                .send(axum::extract::ws::Message::Text(text))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    // Read loop: one command at a time, in arrival order
    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(axum::extract::ws::Message::Text(text)) => {
                match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(command) => state.signaling.handle_command(&ctx, command),
                    Err(err) => {
                        debug!(
                            client_id = %client_id,
                            error = %err,
                            "Rejected malformed signaling frame"
                        );
                        ctx_reply_error(&ctx, &err);
                    }
                }
            }
            Ok(axum::extract::ws::Message::Close(_)) | Err(_) => break,
            // Binary frames have no place on the signaling plane
            Ok(axum::extract::ws::Message::Binary(_)) => {
                warn!(client_id = %client_id, "Ignoring binary frame on signaling socket");
            }
            // Protocol-level ping/pong is handled by the WebSocket stack
            Ok(_) => {}
        }
    }

    state.signaling.handle_disconnect(&ctx);
    drop(ctx);
    // Sender dropped above; the writer drains remaining events and exits
    let _ = writer.await;

    info!(
        client_id = %client_id,
        connection_id = %connection_id,
        "Signaling connection closed"
    );
}

fn ctx_reply_error(ctx: &ClientContext, err: &serde_json::Error) {
    let _ = ctx.sender.try_send(ServerEvent::error(
        ErrorCode::BadMessage,
        format!("Malformed message: {err}"),
    ));
}
