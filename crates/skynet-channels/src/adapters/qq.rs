//! QQ official-bot WebSocket adapter (the Tencent "QQ Guild"/QQ Bot gateway
//! protocol) plus OneBot-style CQ-code decoding for attachments embedded in
//! plain-text message content.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use skynet_bus::MessageBus;
use skynet_core::types::{InboundEnvelope, Media, MediaType, OutboundEnvelope};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{info, warn};

use crate::channel::{BaseRuntime, Channel};
use crate::error::{ChannelError, Result};
use crate::types::{AllowList, ChannelStatus};

/// Reconnect backoff floor: the supervisor's first retry after a dropped
/// connection is near-immediate.
const BACKOFF_FLOOR_SECS: u64 = 1;
/// Reconnect backoff ceiling; doubles from the floor up to this cap.
const BACKOFF_CAP_SECS: u64 = 45;

/// `session_id` + last seen sequence number, kept across reconnects so a
/// dropped connection can Resume instead of re-Identifying from scratch.
#[derive(Debug, Clone)]
struct GatewaySession {
    session_id: String,
    seq: u64,
}

/// QQ Bot gateway intents bitmask this adapter subscribes to: guild messages
/// (bit 25 on this provider, rather than the bit 9 AT_MESSAGE default),
/// direct messages, public/guild-at messages, and the two legacy bits
/// (0, 1) the official SDKs always set alongside them.
pub const QQ_INTENTS: u64 = (1 << 25) | (1 << 12) | (1 << 30) | (1 << 0) | (1 << 1);

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: i32,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    t: Option<String>,
    #[serde(default)]
    s: Option<u64>,
}

#[derive(Debug, Serialize)]
struct IdentifyPayload<'a> {
    op: i32,
    d: IdentifyData<'a>,
}

#[derive(Debug, Serialize)]
struct IdentifyData<'a> {
    token: &'a str,
    intents: u64,
    shard: [u32; 2],
}

#[derive(Debug, Serialize)]
struct ResumePayload<'a> {
    op: i32,
    d: ResumeData<'a>,
}

#[derive(Debug, Serialize)]
struct ResumeData<'a> {
    token: &'a str,
    session_id: &'a str,
    seq: u64,
}

pub struct QqAdapter {
    account_id: String,
    gateway_url: String,
    bot_token: String,
    intents: u64,
    runtime: BaseRuntime,
    session: Mutex<Option<GatewaySession>>,
}

impl QqAdapter {
    pub fn new(
        account_id: impl Into<String>,
        gateway_url: impl Into<String>,
        bot_token: impl Into<String>,
        intents: u64,
        allowlist: AllowList,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            gateway_url: gateway_url.into(),
            bot_token: bot_token.into(),
            intents,
            runtime: BaseRuntime::new(allowlist),
            session: Mutex::new(None),
        }
    }

    /// Connect, then either Resume a prior session (if one was saved from an
    /// earlier connection) or fall back to a fresh Identify. `backoff_delay`
    /// is reset to the floor as soon as the handshake completes, so a
    /// connection that stays up for a while doesn't inherit a long delay
    /// from an earlier flaky period.
    async fn run_once(
        &self,
        bus: &MessageBus,
        stop_rx: &mut tokio::sync::watch::Receiver<bool>,
        backoff_delay: &AtomicU64,
    ) -> Result<()> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.gateway_url)
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let hello = read
            .next()
            .await
            .ok_or_else(|| ChannelError::ConnectionFailed("gateway closed before hello".into()))?
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;
        let hello: GatewayPayload = parse_text_frame(&hello)?;
        if hello.op != 10 {
            return Err(ChannelError::ConnectionFailed(format!(
                "expected hello (op 10), got op {}",
                hello.op
            )));
        }
        let heartbeat_interval_ms = hello.d["heartbeat_interval"].as_u64().unwrap_or(45_000);

        let resumable = self.session.lock().unwrap().clone();
        if let Some(session) = &resumable {
            let resume = ResumePayload {
                op: 6,
                d: ResumeData {
                    token: &self.bot_token,
                    session_id: &session.session_id,
                    seq: session.seq,
                },
            };
            write
                .send(WsMessage::Text(serde_json::to_string(&resume).unwrap()))
                .await
                .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;
            info!(account = %self.account_id, session_id = %session.session_id, "qq: resuming gateway session");
        } else {
            let identify = IdentifyPayload {
                op: 2,
                d: IdentifyData {
                    token: &self.bot_token,
                    intents: self.intents,
                    shard: [0, 1],
                },
            };
            write
                .send(WsMessage::Text(serde_json::to_string(&identify).unwrap()))
                .await
                .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;
        }

        backoff_delay.store(BACKOFF_FLOOR_SECS, Ordering::SeqCst);

        let mut heartbeat = tokio::time::interval(std::time::Duration::from_millis(heartbeat_interval_ms));
        heartbeat.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        return Ok(());
                    }
                }
                _ = heartbeat.tick() => {
                    let beat = json!({ "op": 1, "d": Value::Null });
                    if write.send(WsMessage::Text(beat.to_string())).await.is_err() {
                        return Err(ChannelError::ConnectionFailed("heartbeat send failed".into()));
                    }
                }
                frame = read.next() => {
                    let frame = frame.ok_or_else(|| ChannelError::ConnectionFailed("gateway closed".into()))?
                        .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;
                    let payload: GatewayPayload = match parse_text_frame(&frame) {
                        Ok(p) => p,
                        Err(_) => continue,
                    };
                    match payload.op {
                        // Invalid Session: the resume/identify was rejected.
                        // Drop any saved session so the next reconnect
                        // attempt falls back to a fresh Identify.
                        9 => {
                            warn!(account = %self.account_id, "qq: gateway rejected session, will re-identify");
                            *self.session.lock().unwrap() = None;
                            return Err(ChannelError::ConnectionFailed("invalid session".into()));
                        }
                        0 => {
                            if let Some(seq) = payload.s {
                                self.track_seq(seq);
                            }
                            if payload.t.as_deref() == Some("READY") {
                                if let Some(session_id) = payload.d["session_id"].as_str() {
                                    *self.session.lock().unwrap() = Some(GatewaySession {
                                        session_id: session_id.to_string(),
                                        seq: payload.s.unwrap_or(0),
                                    });
                                }
                            }
                            self.handle_dispatch(bus, payload).await?;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn track_seq(&self, seq: u64) {
        if let Some(session) = self.session.lock().unwrap().as_mut() {
            session.seq = seq;
        }
    }

    async fn handle_dispatch(&self, bus: &MessageBus, payload: GatewayPayload) -> Result<()> {
        let event_type = payload.t.as_deref().unwrap_or("");
        if !matches!(event_type, "AT_MESSAGE_CREATE" | "DIRECT_MESSAGE_CREATE" | "MESSAGE_CREATE") {
            return Ok(());
        }
        let author_id = payload.d["author"]["id"].as_str().unwrap_or("").to_string();
        if !self.is_allowed(&author_id) {
            warn!(sender = %author_id, "qq: sender not in allowlist, dropping");
            return Ok(());
        }
        let chat_id = payload.d["channel_id"]
            .as_str()
            .or_else(|| payload.d["guild_id"].as_str())
            .unwrap_or("")
            .to_string();
        let raw_content = payload.d["content"].as_str().unwrap_or("").to_string();
        let (content, media) = parse_cq_code(&raw_content);

        let mut envelope = InboundEnvelope::new("qq", self.account_id.clone(), author_id, chat_id, content);
        envelope.media = media;
        bus.publish_inbound(envelope).await?;
        Ok(())
    }
}

fn parse_text_frame(frame: &WsMessage) -> Result<GatewayPayload> {
    match frame {
        WsMessage::Text(text) => serde_json::from_str(text)
            .map_err(|e| ChannelError::ConnectionFailed(format!("malformed gateway frame: {e}"))),
        _ => Err(ChannelError::ConnectionFailed("expected text frame".into())),
    }
}

/// Decode OneBot-style CQ codes (`[CQ:type,k=v,...]`) embedded in message
/// text. `at` substitutes `@<qq>`; image/face/record/video/file/share
/// substitute a bracketed placeholder tag and (for image/video/record) also
/// produce a `Media` entry; any other CQ type is dropped from the text with
/// no media entry.
pub fn parse_cq_code(raw: &str) -> (String, Vec<Media>) {
    let mut text = String::new();
    let mut media = Vec::new();
    let mut rest = raw;

    while let Some(start) = rest.find("[CQ:") {
        text.push_str(&rest[..start]);
        let Some(end) = rest[start..].find(']') else {
            text.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let tag = &rest[start + 4..start + end];
        rest = &rest[start + end + 1..];

        let mut parts = tag.splitn(2, ',');
        let cq_type = parts.next().unwrap_or("");
        let mut fields = std::collections::HashMap::new();
        if let Some(kvs) = parts.next() {
            for kv in kvs.split(',') {
                if let Some((k, v)) = kv.split_once('=') {
                    fields.insert(k.to_string(), v.to_string());
                }
            }
        }

        match cq_type {
            "at" => {
                if let Some(qq) = fields.get("qq") {
                    text.push('@');
                    text.push_str(qq);
                }
            }
            "image" | "video" | "record" | "face" | "file" | "share" => {
                text.push_str(placeholder_tag(cq_type));
                if let Some(media_type) = media_type_for(cq_type) {
                    media.push(Media {
                        media_type,
                        url: fields.get("url").cloned(),
                        base64: fields.get("file").cloned(),
                        mime_type: String::new(),
                    });
                }
            }
            _ => {}
        }
    }
    text.push_str(rest);
    (text, media)
}

fn placeholder_tag(cq_type: &str) -> &'static str {
    match cq_type {
        "image" => "[图片]",
        "video" => "[视频]",
        "record" => "[语音]",
        "face" => "[表情]",
        "file" => "[文件]",
        "share" => "[分享]",
        _ => "",
    }
}

fn media_type_for(cq_type: &str) -> Option<MediaType> {
    match cq_type {
        "image" => Some(MediaType::Image),
        "video" => Some(MediaType::Video),
        "record" => Some(MediaType::Audio),
        _ => None,
    }
}

#[async_trait]
impl Channel for QqAdapter {
    fn name(&self) -> &str {
        "qq"
    }

    fn account_id(&self) -> &str {
        &self.account_id
    }

    async fn start(&self, bus: Arc<MessageBus>) -> Result<()> {
        let mut stop_rx = self.runtime.begin_run();
        let backoff_delay = AtomicU64::new(BACKOFF_FLOOR_SECS);
        info!(account = %self.account_id, "qq: connecting to gateway");
        loop {
            if *stop_rx.borrow() {
                return Ok(());
            }
            if let Err(e) = self.run_once(&bus, &mut stop_rx, &backoff_delay).await {
                warn!(error = %e, "qq: gateway session ended, reconnecting");
            }
            if *stop_rx.borrow() {
                return Ok(());
            }
            let delay = backoff_delay.load(Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
            backoff_delay.store((delay * 2).min(BACKOFF_CAP_SECS), Ordering::SeqCst);
        }
    }

    async fn stop(&self) -> Result<()> {
        self.runtime.request_stop();
        Ok(())
    }

    async fn send(&self, _envelope: &OutboundEnvelope) -> Result<()> {
        // Sending requires the REST API (separate from the gateway socket),
        // out of scope for this adapter's gateway-focused responsibility.
        Err(ChannelError::SendFailed(
            "qq outbound delivery requires the REST API client, not modeled here".into(),
        ))
    }

    fn status(&self) -> ChannelStatus {
        self.runtime.status()
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        self.runtime.is_allowed(sender_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_the_floor_up_to_the_cap() {
        let delay = AtomicU64::new(BACKOFF_FLOOR_SECS);
        let mut seen = Vec::new();
        for _ in 0..8 {
            let current = delay.load(Ordering::SeqCst);
            seen.push(current);
            delay.store((current * 2).min(BACKOFF_CAP_SECS), Ordering::SeqCst);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 32, 45, 45]);
    }

    #[test]
    fn track_seq_updates_the_saved_session_but_not_a_missing_one() {
        let adapter = QqAdapter::new("acct", "wss://example", "token", QQ_INTENTS, AllowList::new(vec![]));
        adapter.track_seq(7);
        assert!(adapter.session.lock().unwrap().is_none());

        *adapter.session.lock().unwrap() = Some(GatewaySession { session_id: "s1".into(), seq: 1 });
        adapter.track_seq(42);
        assert_eq!(adapter.session.lock().unwrap().as_ref().unwrap().seq, 42);
    }

    #[test]
    fn parses_plain_text_with_no_cq_codes() {
        let (text, media) = parse_cq_code("hello world");
        assert_eq!(text, "hello world");
        assert!(media.is_empty());
    }

    #[test]
    fn extracts_image_cq_code_and_substitutes_a_placeholder_tag() {
        let (text, media) = parse_cq_code("look [CQ:image,file=abc.jpg,url=https://x/abc.jpg] at this");
        assert_eq!(text, "look [图片] at this");
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].url.as_deref(), Some("https://x/abc.jpg"));
    }

    #[test]
    fn handles_multiple_cq_codes() {
        let (text, media) = parse_cq_code("[CQ:image,file=a.jpg][CQ:record,file=b.amr]hi");
        assert_eq!(text, "[图片][语音]hi");
        assert_eq!(media.len(), 2);
    }

    #[test]
    fn at_cq_code_substitutes_literal_mention_with_no_media() {
        let (text, media) = parse_cq_code("Hello [CQ:at,qq=123] [CQ:image,file=x]");
        assert_eq!(text, "Hello @123 [图片]");
        assert_eq!(media.len(), 1);
    }
}
