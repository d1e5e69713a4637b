//! Realtime notification socket.
//!
//! Browsers cannot set headers on a websocket handshake, so the access
//! token travels in the `token` query parameter.

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::AppState;
use crate::auth::authenticate;
use crate::error::{AppError, AppQuery};

#[derive(Debug, Deserialize)]
pub struct SocketQuery {
    pub token: String,
}

const PONG: &str = r#"{"type":"pong"}"#;

pub async fn notifications_socket(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    AppQuery(query): AppQuery<SocketQuery>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, AppError> {
    let caller = authenticate(&state, &query.token)?;
    if caller.id() != user_id {
        return Err(AppError::Forbidden("Token does not belong to this user".to_string()));
    }
    let upgrade = upgrade.map_err(|e| AppError::BadRequest(e.body_text()))?;
    Ok(upgrade.on_upgrade(move |socket| serve(state, user_id, socket)))
}

async fn serve(state: Arc<AppState>, user_id: String, socket: WebSocket) {
    let (connection_id, mut outbound) = state.connections.connect(&user_id);
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            Some(text) = outbound.recv() => {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_client_message(&state, &user_id, text.as_str()) {
                        if sink.send(Message::Text(reply.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(user_id, error = %e, "Websocket receive failed");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    state.connections.disconnect(&user_id, connection_id);
}

/// `ping` is answered; `ack:<id>` marks the notification read.
pub(crate) fn handle_client_message(state: &AppState, user_id: &str, text: &str) -> Option<String> {
    let text = text.trim();
    if text == "ping" {
        return Some(PONG.to_string());
    }
    if let Some(id) = text.strip_prefix("ack:") {
        let acked = state
            .lock_db()
            .and_then(|db| db.mark_notification_read(user_id, id).map_err(AppError::from));
        if let Err(e) = acked {
            warn!(user_id, notification_id = id, error = %e, "Websocket ack failed");
        }
    }
    None
}
