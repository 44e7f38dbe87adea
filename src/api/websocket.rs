//! WebSocket handler for interactive evaluation.
//!
//! Each text frame `{"type":"eval","src":...}` is evaluated in arrival
//! order against the session named in the URL and answered with a
//! `result` or `error` frame.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tracing::debug;

use super::handlers::{evaluate_chunk, AppState};
use super::types::WsMessage;
use crate::error::ReplTunnelError;
use crate::session::SessionId;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

/// Serialize and send one frame. Returns false once the peer is gone.
async fn send(sink: &mut SplitSink<WebSocket, Message>, msg: &WsMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sink.send(Message::Text(json.into())).await.is_ok(),
        Err(_) => true,
    }
}

/// Handle WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState, session_id: String) {
    let (mut sink, mut stream) = socket.split();

    // Verify session exists
    let id = match session_id.parse::<SessionId>() {
        Ok(id) if state.store.contains(&id) => id,
        _ => {
            let err = ReplTunnelError::SessionNotFound(session_id);
            send(&mut sink, &WsMessage::from_error(&err)).await;
            return;
        }
    };
    debug!(session = %id, "websocket attached");

    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(data)) => {
                let _ = sink.send(Message::Pong(data)).await;
                continue;
            }
            Ok(_) => continue,
            Err(_) => break,
        };

        let ws_msg: WsMessage = match serde_json::from_str(&msg) {
            Ok(m) => m,
            Err(e) => {
                let err = WsMessage::Error {
                    code: "BAD_REQUEST".to_string(),
                    message: e.to_string(),
                    line: None,
                };
                if !send(&mut sink, &err).await {
                    break;
                }
                continue;
            }
        };

        let reply = match ws_msg {
            WsMessage::Eval { src } => {
                match evaluate_chunk(Arc::clone(&state.store), id, src).await {
                    Ok((evaluation, duration_ms)) => {
                        WsMessage::from_evaluation(&evaluation, duration_ms)
                    }
                    Err(e) => WsMessage::from_error(&e),
                }
            }
            WsMessage::Ping => WsMessage::Pong,
            // Ignore other message types from client
            _ => continue,
        };

        if !send(&mut sink, &reply).await {
            break;
        }
    }

    debug!(session = %id, "websocket detached");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_message_eval_parse() {
        let json = r#"{"type": "eval", "src": "x = 1\nx"}"#;
        let msg: WsMessage = serde_json::from_str(json).unwrap();
        match msg {
            WsMessage::Eval { src } => assert_eq!(src, "x = 1\nx"),
            _ => panic!("Expected Eval message"),
        }
    }

    #[test]
    fn test_ws_message_ping_parse() {
        let json = r#"{"type": "ping"}"#;
        let msg: WsMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, WsMessage::Ping));
    }

    #[test]
    fn test_ws_message_missing_src() {
        let json = r#"{"type": "eval"}"#;
        assert!(serde_json::from_str::<WsMessage>(json).is_err());
    }
}
