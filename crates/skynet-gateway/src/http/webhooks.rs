//! C8 — shared webhook HTTP front-end.
//!
//! Routes `/webhook/<channel>[/<account>]` (plus legacy per-channel paths
//! kept indefinitely per `DESIGN.md`'s Open Question resolution) to the
//! verification scheme and payload decoder for that channel, then
//! publishes the decoded message as an [`InboundEnvelope`] directly onto
//! the bus — webhook channels never run their own inbound task, unlike
//! the WebSocket/polling adapters in `skynet-channels::adapters`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use skynet_channels::verify::{decrypt_wework, verify_bearer_token, verify_feishu_sha1, verify_hmac_sha256};
use skynet_core::config::ChannelConfigEntry;
use skynet_core::types::InboundEnvelope;
use tracing::{info, warn};

use crate::app::AppState;

/// `POST/GET /webhook/:channel` — account defaults to `"default"`.
pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> Response {
    dispatch(&state, &channel, "default", method, headers, query, body).await
}

/// `POST/GET /webhook/:channel/:account`.
pub async fn webhook_handler_with_account(
    State(state): State<Arc<AppState>>,
    Path((channel, account)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> Response {
    dispatch(&state, &channel, &account, method, headers, query, body).await
}

/// `POST/GET /feishu/webhook` — legacy path, equivalent to `/webhook/feishu`.
pub async fn legacy_feishu_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> Response {
    dispatch(&state, "feishu", "default", method, headers, query, body).await
}

/// `POST/GET /wework/event` — legacy path, equivalent to `/webhook/wework`.
pub async fn legacy_wework_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> Response {
    dispatch(&state, "wework", "default", method, headers, query, body).await
}

fn channel_cfg<'a>(state: &'a AppState, channel: &str) -> Option<ChannelConfigEntry> {
    let config = state.config.read().unwrap();
    config.channels.entries.get(channel).cloned()
}

async fn dispatch(
    state: &Arc<AppState>,
    channel: &str,
    account: &str,
    method: Method,
    headers: HeaderMap,
    query: HashMap<String, String>,
    body: String,
) -> Response {
    let Some(entry) = channel_cfg(state, channel) else {
        warn!(channel, "webhook for unconfigured channel");
        return (StatusCode::NOT_FOUND, Json(json!({"error": "unknown channel"}))).into_response();
    };

    let outcome = match channel {
        "feishu" => handle_feishu(&entry, &method, &headers, &body),
        "wework" => handle_wework(&entry, &method, &query, &body),
        "slack" => handle_slack(&entry, &headers, &body),
        "teams" => handle_teams(&entry, &headers, &body),
        "google_chat" => handle_google_chat(&entry, &headers, &body),
        other => {
            warn!(channel = other, "no webhook decoder registered for this channel");
            return (StatusCode::NOT_FOUND, Json(json!({"error": "no webhook decoder for channel"}))).into_response();
        }
    };

    match outcome {
        Ok(WebhookOutcome::Echo(text)) => (StatusCode::OK, text).into_response(),
        Ok(WebhookOutcome::Message { sender_id, chat_id, content }) => {
            let envelope = InboundEnvelope::new(channel, account, sender_id, chat_id, content);
            info!(channel, account, envelope_id = %envelope.id, "webhook message decoded");
            if let Err(e) = state.bus.publish_inbound(envelope).await {
                warn!(channel, error = %e, "failed to publish webhook envelope onto the bus");
                return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "bus closed"}))).into_response();
            }
            (StatusCode::OK, Json(json!({"ok": true}))).into_response()
        }
        Ok(WebhookOutcome::Ignored) => (StatusCode::OK, Json(json!({"ok": true, "ignored": true}))).into_response(),
        Err(WebhookError::Unauthorized(reason)) => {
            warn!(channel, %reason, "webhook signature/auth verification failed");
            (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"}))).into_response()
        }
        Err(WebhookError::BadRequest(reason)) => {
            (StatusCode::BAD_REQUEST, Json(json!({"error": reason}))).into_response()
        }
    }
}

enum WebhookOutcome {
    /// Respond with this exact body (Feishu `challenge`, WeWork `echostr`).
    Echo(String),
    Message { sender_id: String, chat_id: String, content: String },
    /// Authenticated but nothing worth forwarding (e.g. a non-message event).
    Ignored,
}

enum WebhookError {
    Unauthorized(String),
    BadRequest(String),
}

/// Lexicographic-concatenation SHA-1, the scheme `spec.md` §4.5 describes
/// generically for Feishu/WeWork URL-verification handshakes: sort
/// `{token, timestamp, nonce, data}`, concatenate, SHA-1, compare hex.
fn verify_lexicographic_sha1(parts: &[&str], expected_hex: &str) -> bool {
    let mut sorted: Vec<&str> = parts.to_vec();
    sorted.sort_unstable();
    let mut hasher = Sha1::new();
    hasher.update(sorted.concat().as_bytes());
    hex::encode(hasher.finalize()) == expected_hex
}

fn handle_feishu(entry: &ChannelConfigEntry, method: &Method, headers: &HeaderMap, body: &str) -> Result<WebhookOutcome, WebhookError> {
    let payload: Value = serde_json::from_str(body)
        .map_err(|e| WebhookError::BadRequest(format!("invalid JSON body: {e}")))?;

    // URL-verification handshake: Feishu checks the shared token embedded
    // in the body, not a header signature.
    if payload.get("type").and_then(Value::as_str) == Some("url_verification") {
        let token = payload.get("token").and_then(Value::as_str).unwrap_or("");
        if entry.verification_token.as_deref() != Some(token) {
            return Err(WebhookError::Unauthorized("verification token mismatch".into()));
        }
        let challenge = payload.get("challenge").and_then(Value::as_str).unwrap_or("").to_string();
        return Ok(WebhookOutcome::Echo(json!({"challenge": challenge}).to_string()));
    }

    if *method == Method::POST {
        let secret = entry
            .verification_token
            .as_deref()
            .ok_or_else(|| WebhookError::Unauthorized("no verification token configured".into()))?;
        let timestamp = headers
            .get("x-lark-request-timestamp")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| WebhookError::BadRequest("missing X-Lark-Request-Timestamp".into()))?;
        let signature = headers
            .get("x-lark-signature")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| WebhookError::BadRequest("missing X-Lark-Signature".into()))?;
        verify_feishu_sha1(secret, timestamp, signature)
            .map_err(|e| WebhookError::Unauthorized(e.to_string()))?;
    }

    let event = payload.get("event").unwrap_or(&payload);
    let content_raw = event
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .unwrap_or("");
    let content = serde_json::from_str::<Value>(content_raw)
        .ok()
        .and_then(|v| v.get("text").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| content_raw.to_string());
    if content.is_empty() {
        return Ok(WebhookOutcome::Ignored);
    }
    let sender_id = event
        .get("sender")
        .and_then(|s| s.get("sender_id"))
        .and_then(|s| s.get("open_id"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let chat_id = event
        .get("message")
        .and_then(|m| m.get("chat_id"))
        .and_then(Value::as_str)
        .unwrap_or(&sender_id)
        .to_string();
    Ok(WebhookOutcome::Message { sender_id, chat_id, content })
}

fn handle_wework(entry: &ChannelConfigEntry, method: &Method, query: &HashMap<String, String>, body: &str) -> Result<WebhookOutcome, WebhookError> {
    let token = entry
        .verification_token
        .as_deref()
        .ok_or_else(|| WebhookError::Unauthorized("no verification token configured".into()))?;
    let timestamp = query.get("timestamp").map(String::as_str).ok_or_else(|| WebhookError::BadRequest("missing timestamp".into()))?;
    let nonce = query.get("nonce").map(String::as_str).ok_or_else(|| WebhookError::BadRequest("missing nonce".into()))?;
    let signature = query
        .get("msg_signature")
        .map(String::as_str)
        .ok_or_else(|| WebhookError::BadRequest("missing msg_signature".into()))?;

    if *method == Method::GET {
        // URL-verification handshake: the signed `data` is `echostr` itself.
        let echostr = query.get("echostr").map(String::as_str).ok_or_else(|| WebhookError::BadRequest("missing echostr".into()))?;
        if !verify_lexicographic_sha1(&[token, timestamp, nonce, echostr], signature) {
            return Err(WebhookError::Unauthorized("signature mismatch".into()));
        }
        let plaintext = decrypt_echo(entry, echostr)?;
        return Ok(WebhookOutcome::Echo(plaintext));
    }

    let encrypted = extract_xml_tag(body, "Encrypt").unwrap_or_default();
    let signed_data = if encrypted.is_empty() { body } else { &encrypted };
    if !verify_lexicographic_sha1(&[token, timestamp, nonce, signed_data], signature) {
        return Err(WebhookError::Unauthorized("signature mismatch".into()));
    }

    // An empty configured encryption key means plaintext mode: the body is
    // already the message XML.
    let message_xml = if encrypted.is_empty() {
        body.to_string()
    } else {
        let key = entry
            .encrypt_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| WebhookError::Unauthorized("no encrypt_key configured for an encrypted payload".into()))?;
        let corp_id = entry.credentials.get("corp_id").map(String::as_str).unwrap_or("");
        let key_bytes = wework_key_bytes(key)?;
        decrypt_wework(&key_bytes, &encrypted, corp_id).map_err(|e| WebhookError::Unauthorized(e.to_string()))?
    };

    let content = extract_xml_tag(&message_xml, "Content").unwrap_or_default();
    if content.is_empty() {
        return Ok(WebhookOutcome::Ignored);
    }
    let sender_id = extract_xml_tag(&message_xml, "FromUserName").unwrap_or_else(|| "unknown".into());
    let chat_id = extract_xml_tag(&message_xml, "ToUserName").unwrap_or_else(|| sender_id.clone());
    Ok(WebhookOutcome::Message { sender_id, chat_id, content })
}

fn decrypt_echo(entry: &ChannelConfigEntry, echostr: &str) -> Result<String, WebhookError> {
    let key = entry
        .encrypt_key
        .as_deref()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| WebhookError::Unauthorized("no encrypt_key configured".into()))?;
    let corp_id = entry.credentials.get("corp_id").map(String::as_str).unwrap_or("");
    let key_bytes = wework_key_bytes(key)?;
    decrypt_wework(&key_bytes, echostr, corp_id).map_err(|e| WebhookError::Unauthorized(e.to_string()))
}

fn wework_key_bytes(encoding_aes_key: &str) -> Result<[u8; 32], WebhookError> {
    use base64::Engine;
    let padded = format!("{encoding_aes_key}=");
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(padded)
        .map_err(|e| WebhookError::BadRequest(format!("invalid encoding_aes_key: {e}")))?;
    decoded
        .try_into()
        .map_err(|_| WebhookError::BadRequest("encoding_aes_key must decode to 32 bytes".into()))
}

/// Minimal single-occurrence `<Tag>value</Tag>` extraction — WeWork's
/// callback XML is flat and never nests a tag inside itself, so this needs
/// no real XML parser.
fn extract_xml_tag(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    let raw = &xml[start..end];
    Some(raw.trim_start_matches("<![CDATA[").trim_end_matches("]]>").to_string())
}

fn handle_slack(entry: &ChannelConfigEntry, headers: &HeaderMap, body: &str) -> Result<WebhookOutcome, WebhookError> {
    let payload: Value = serde_json::from_str(body)
        .map_err(|e| WebhookError::BadRequest(format!("invalid JSON body: {e}")))?;

    if payload.get("type").and_then(Value::as_str) == Some("url_verification") {
        let challenge = payload.get("challenge").and_then(Value::as_str).unwrap_or("").to_string();
        return Ok(WebhookOutcome::Echo(json!({"challenge": challenge}).to_string()));
    }

    let secret = entry
        .verification_token
        .as_deref()
        .ok_or_else(|| WebhookError::Unauthorized("no signing secret configured".into()))?;
    let timestamp = headers
        .get("x-slack-request-timestamp")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| WebhookError::BadRequest("missing X-Slack-Request-Timestamp".into()))?;
    let signature = headers
        .get("x-slack-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| WebhookError::BadRequest("missing X-Slack-Signature".into()))?;
    let base = skynet_channels::adapters::slack::signing_base_string(timestamp, body);
    verify_hmac_sha256(secret.as_bytes(), base.as_bytes(), signature)
        .map_err(|e| WebhookError::Unauthorized(e.to_string()))?;

    let event = payload.get("event");
    let content = event
        .and_then(|e| e.get("text"))
        .or_else(|| payload.get("text"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    if content.is_empty() {
        return Ok(WebhookOutcome::Ignored);
    }
    let sender_id = event
        .and_then(|e| e.get("user"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let chat_id = event
        .and_then(|e| e.get("channel"))
        .and_then(Value::as_str)
        .unwrap_or(&sender_id)
        .to_string();
    Ok(WebhookOutcome::Message { sender_id, chat_id, content })
}

fn handle_teams(entry: &ChannelConfigEntry, headers: &HeaderMap, body: &str) -> Result<WebhookOutcome, WebhookError> {
    bearer_guard(entry, headers)?;
    let payload: Value =
        serde_json::from_str(body).map_err(|e| WebhookError::BadRequest(format!("invalid JSON body: {e}")))?;
    let content = payload.get("text").and_then(Value::as_str).unwrap_or("").to_string();
    if content.is_empty() {
        return Ok(WebhookOutcome::Ignored);
    }
    let sender_id = payload
        .get("from")
        .and_then(|f| f.get("id"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let chat_id = payload
        .get("conversation")
        .and_then(|c| c.get("id"))
        .and_then(Value::as_str)
        .unwrap_or(&sender_id)
        .to_string();
    Ok(WebhookOutcome::Message { sender_id, chat_id, content })
}

fn handle_google_chat(entry: &ChannelConfigEntry, headers: &HeaderMap, body: &str) -> Result<WebhookOutcome, WebhookError> {
    bearer_guard(entry, headers)?;
    let payload: Value =
        serde_json::from_str(body).map_err(|e| WebhookError::BadRequest(format!("invalid JSON body: {e}")))?;
    let content = payload
        .get("message")
        .and_then(|m| m.get("text"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    if content.is_empty() {
        return Ok(WebhookOutcome::Ignored);
    }
    let sender_id = payload
        .get("message")
        .and_then(|m| m.get("sender"))
        .and_then(|s| s.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let chat_id = payload
        .get("space")
        .and_then(|s| s.get("name"))
        .and_then(Value::as_str)
        .unwrap_or(&sender_id)
        .to_string();
    Ok(WebhookOutcome::Message { sender_id, chat_id, content })
}

fn bearer_guard(entry: &ChannelConfigEntry, headers: &HeaderMap) -> Result<(), WebhookError> {
    let token = entry
        .verification_token
        .as_deref()
        .ok_or_else(|| WebhookError::Unauthorized("no verification token configured".into()))?;
    let header = headers.get("authorization").and_then(|v| v.to_str().ok());
    verify_bearer_token(token, header).map_err(|e| WebhookError::Unauthorized(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with_token(token: &str) -> ChannelConfigEntry {
        ChannelConfigEntry {
            enabled: true,
            verification_token: Some(token.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn feishu_url_verification_echoes_challenge() {
        let entry = entry_with_token("tok");
        let body = json!({"type": "url_verification", "token": "tok", "challenge": "abc123"}).to_string();
        let outcome = handle_feishu(&entry, &Method::POST, &HeaderMap::new(), &body).unwrap();
        assert!(matches!(outcome, WebhookOutcome::Echo(text) if text.contains("abc123")));
    }

    #[test]
    fn feishu_url_verification_rejects_wrong_token() {
        let entry = entry_with_token("tok");
        let body = json!({"type": "url_verification", "token": "wrong", "challenge": "abc"}).to_string();
        assert!(matches!(
            handle_feishu(&entry, &Method::POST, &HeaderMap::new(), &body),
            Err(WebhookError::Unauthorized(_))
        ));
    }

    #[test]
    fn feishu_empty_content_is_ignored_not_errored() {
        let entry = ChannelConfigEntry::default();
        let body = json!({"event": {"message": {"content": ""}}}).to_string();
        let outcome = handle_feishu(&entry, &Method::GET, &HeaderMap::new(), &body).unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored));
    }

    #[test]
    fn extract_xml_tag_reads_flat_fields() {
        let xml = "<xml><ToUserName><![CDATA[corp1]]></ToUserName><Content><![CDATA[hello]]></Content></xml>";
        assert_eq!(extract_xml_tag(xml, "Content").as_deref(), Some("hello"));
        assert_eq!(extract_xml_tag(xml, "ToUserName").as_deref(), Some("corp1"));
        assert_eq!(extract_xml_tag(xml, "Missing"), None);
    }

    #[test]
    fn lexicographic_sha1_matches_manual_computation() {
        let mut hasher = Sha1::new();
        let mut parts = vec!["b", "a", "c"];
        parts.sort_unstable();
        hasher.update(parts.concat().as_bytes());
        let expected = hex::encode(hasher.finalize());
        assert!(verify_lexicographic_sha1(&["a", "b", "c"], &expected));
        assert!(!verify_lexicographic_sha1(&["a", "b", "d"], &expected));
    }

    #[test]
    fn malformed_json_body_is_bad_request_not_panic() {
        let entry = ChannelConfigEntry::default();
        let err = handle_slack(&entry, &HeaderMap::new(), "not json").unwrap_err();
        assert!(matches!(err, WebhookError::BadRequest(_)));
    }
}
