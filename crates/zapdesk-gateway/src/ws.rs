// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Operator UI WebSocket.
//!
//! Connect with `GET /ws?tenant_id=1&user_id=7&token=...`. The socket joins
//! its tenant's main room on admission.
//!
//! Client -> Server (JSON):
//! ```json
//! {"action": "join", "room": "tenant-1-pending"}
//! {"action": "leave", "room": "ticket-42"}
//! {"action": "ping"}
//! ```
//!
//! Server -> Client (JSON): batched envelopes from the realtime layer,
//! `{"event": "ticket", "data": {...}, "compressed": false}`, plus replies:
//! ```json
//! {"type": "joined", "room": "tenant-1-pending"}
//! {"type": "left", "room": "ticket-42"}
//! {"type": "pong"}
//! {"type": "error", "message": "..."}
//! ```

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use zapdesk_core::types::{TenantId, UserId};

use crate::server::GatewayState;

const WRITER_CAPACITY: usize = 64;

/// Handshake query parameters.
#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    #[serde(default)]
    pub token: Option<String>,
}

/// Frame sent by the client.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientFrame {
    Join { room: String },
    Leave { room: String },
    Ping,
}

/// GET /ws
///
/// Authentication and pool admission happen before the upgrade, so a refused
/// client gets an HTTP status instead of a dropped socket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    Query(params): Query<WsParams>,
) -> Response {
    if !state.auth.accepts_socket(params.token.as_deref()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if !state
        .realtime
        .hub
        .pool()
        .can_connect(params.tenant_id, params.user_id)
    {
        debug!(
            tenant_id = params.tenant_id,
            user_id = params.user_id,
            "socket refused at capacity"
        );
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, params))
}

async fn handle_socket(socket: WebSocket, state: GatewayState, params: WsParams) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let socket_id = uuid::Uuid::new_v4().to_string();
    let hub = state.realtime.hub.clone();

    let (tx, mut rx) = mpsc::channel::<String>(WRITER_CAPACITY);
    if let Err(e) = hub.register(&socket_id, params.tenant_id, params.user_id, tx.clone()) {
        warn!(tenant_id = params.tenant_id, error = %e, "socket admission failed");
        let _ = ws_sender
            .send(Message::Text(error_frame(&e.to_string()).into()))
            .await;
        let _ = ws_sender.close().await;
        return;
    }

    // Ends when the hub drops the writer or the client goes away.
    let sender_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            Message::Text(text) => {
                if !hub.touch(&socket_id) {
                    // swept for inactivity
                    break;
                }
                let reply = match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(ClientFrame::Join { room }) => match hub.join(&socket_id, &room).await {
                        Ok(()) => json!({"type": "joined", "room": room}).to_string(),
                        Err(e) => error_frame(&e.to_string()),
                    },
                    Ok(ClientFrame::Leave { room }) => {
                        hub.leave(&socket_id, &room);
                        json!({"type": "left", "room": room}).to_string()
                    }
                    Ok(ClientFrame::Ping) => json!({"type": "pong"}).to_string(),
                    Err(e) => {
                        debug!(socket_id, error = %e, "invalid socket frame");
                        error_frame("invalid frame")
                    }
                };
                if tx.send(reply).await.is_err() {
                    break;
                }
            }
            Message::Ping(_) | Message::Pong(_) => {
                hub.touch(&socket_id);
            }
            Message::Close(_) => break,
            Message::Binary(_) => {}
        }
    }

    hub.unregister(&socket_id);
    sender_task.abort();
    debug!(socket_id, "socket closed");
}

fn error_frame(message: &str) -> String {
    json!({"type": "error", "message": message}).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_deserialize() {
        let join: ClientFrame =
            serde_json::from_str(r#"{"action": "join", "room": "tenant-1-open"}"#).unwrap();
        assert!(matches!(join, ClientFrame::Join { room } if room == "tenant-1-open"));

        let ping: ClientFrame = serde_json::from_str(r#"{"action": "ping"}"#).unwrap();
        assert!(matches!(ping, ClientFrame::Ping));
    }

    #[test]
    fn unknown_action_is_rejected() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"action": "shout"}"#).is_err());
        assert!(serde_json::from_str::<ClientFrame>(r#"{"action": "join"}"#).is_err());
    }

    #[test]
    fn params_token_is_optional() {
        let params: WsParams =
            serde_json::from_value(serde_json::json!({"tenant_id": 1, "user_id": 7})).unwrap();
        assert_eq!(params.tenant_id, 1);
        assert!(params.token.is_none());
    }

    #[test]
    fn error_frame_shape() {
        let frame: serde_json::Value = serde_json::from_str(&error_frame("nope")).unwrap();
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["message"], "nope");
    }
}
