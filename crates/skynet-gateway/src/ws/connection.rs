//! C11 — JSON-RPC 2.0 over WebSocket.
//!
//! One `GET /ws` upgrade per connection. Each connection gets a session id
//! used both to key [`crate::ws::notifier::SessionNotifier`] (for
//! `agent.stream.event`/`agent.stream.end` pushes) and as the `agent.wait`
//! correlation key via [`crate::gateway_channel::GatewayChannel`].
//!
//! A connection is two independent halves glued by an mpsc channel: the
//! read loop parses and dispatches incoming frames (each dispatch spawned
//! so a slow handler never blocks the next incoming frame), and a single
//! writer task owns the socket's sink and drains everything — responses
//! and out-of-band notifications alike — onto the wire in send order.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use skynet_core::config::MAX_PAYLOAD_BYTES;
use skynet_protocol::{parse_request, RpcId, RpcResponse};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::app::AppState;

const OUTGOING_BUFFER: usize = 64;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session_id = Uuid::now_v7().to_string();
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<String>(OUTGOING_BUFFER);
    state.notifier.register(&session_id, outgoing_tx.clone());

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(frame) = outgoing_rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    debug!(session_id, "websocket connection established");
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                debug!(session_id, error = %e, "websocket read error, closing connection");
                break;
            }
        };
        match message {
            Message::Text(text) => {
                if text.len() > MAX_PAYLOAD_BYTES {
                    warn!(session_id, size = text.len(), "payload too large, closing connection");
                    break;
                }
                let state = state.clone();
                let session_id = session_id.clone();
                let tx = outgoing_tx.clone();
                tokio::spawn(async move {
                    if let Some(frame) = handle_frame(&state, &session_id, &text).await {
                        let _ = tx.send(frame).await;
                    }
                });
            }
            Message::Close(_) => break,
            // Ping/Pong are answered automatically by axum; binary frames
            // aren't part of this protocol.
            _ => {}
        }
    }

    state.notifier.unregister(&session_id);
    writer.abort();
    debug!(session_id, "websocket connection closed");
}

/// Parse, dispatch, and serialize a single incoming frame. Returns `None`
/// for notifications (no id — no response expected).
async fn handle_frame(state: &Arc<AppState>, session_id: &str, raw: &str) -> Option<String> {
    let request = match parse_request(raw) {
        Ok(request) => request,
        Err(err) => {
            let response = RpcResponse::failure(RpcId::Null, err);
            return serde_json::to_string(&response).ok();
        }
    };

    let Some(id_value) = request.id.clone() else {
        // A notification. Still dispatch it (side effects may matter), but
        // the caller gets no response frame either way.
        let params = request.params.unwrap_or(serde_json::Value::Null);
        let _ = state.registry.dispatch(state.clone(), session_id.to_string(), &request.method, params).await;
        return None;
    };
    let id = RpcId::from_value(&id_value).unwrap_or(RpcId::Null);

    let params = request.params.unwrap_or(serde_json::Value::Null);
    let response = match state.registry.dispatch(state.clone(), session_id.to_string(), &request.method, params).await {
        Ok(result) => RpcResponse::success(id, result),
        Err(err) => {
            warn!(session_id, method = %request.method, code = err.code, "rpc handler returned an error");
            RpcResponse::failure(id, err)
        }
    };
    serde_json::to_string(&response).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unparseable_frame_gets_a_null_id_error_response() {
        let state = AppState::for_test();
        let frame = handle_frame(&state, "s1", "not json").await.unwrap();
        assert!(frame.contains("\"id\":null"));
        assert!(frame.contains("\"error\""));
    }

    #[tokio::test]
    async fn notification_without_id_yields_no_response() {
        let state = AppState::for_test();
        let raw = r#"{"jsonrpc":"2.0","method":"health"}"#;
        assert!(handle_frame(&state, "s1", raw).await.is_none());
    }

    #[tokio::test]
    async fn well_formed_request_dispatches_and_returns_a_response() {
        let state = AppState::for_test();
        let raw = r#"{"jsonrpc":"2.0","method":"health","id":"1"}"#;
        let frame = handle_frame(&state, "s1", raw).await.unwrap();
        assert!(frame.contains("\"result\""));
        assert!(frame.contains("\"id\":\"1\""));
    }

    #[tokio::test]
    async fn unknown_method_returns_method_not_found_error() {
        let state = AppState::for_test();
        let raw = r#"{"jsonrpc":"2.0","method":"nonexistent","id":"1"}"#;
        let frame = handle_frame(&state, "s1", raw).await.unwrap();
        assert!(frame.contains("\"error\""));
        assert!(frame.contains("-32601"));
    }
}
