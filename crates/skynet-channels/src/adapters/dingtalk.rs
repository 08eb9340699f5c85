//! DingTalk stream-mode adapter.
//!
//! DingTalk's "Stream Mode" pushes events over a WebSocket obtained via a
//! one-time REST handshake; each event carries a short-lived `sessionWebhook`
//! URL that must be used to reply (there is no stable per-chat send
//! endpoint). The session-webhook cache keeps a bounded, TTL-expiring map
//! from chat id to its current reply URL.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use skynet_bus::MessageBus;
use skynet_core::types::{InboundEnvelope, OutboundEnvelope};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{info, warn};

use crate::channel::{BaseRuntime, Channel};
use crate::error::{ChannelError, Result};
use crate::types::{AllowList, ChannelStatus};

const SESSION_WEBHOOK_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const MAX_CACHE_ENTRIES: usize = 5000;
const JANITOR_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Stream-gateway reconnect backoff floor/cap: 1s, doubling up to 45s.
const BACKOFF_FLOOR_SECS: u64 = 1;
const BACKOFF_CAP_SECS: u64 = 45;

struct CachedWebhook {
    url: String,
    inserted_at: Instant,
}

/// Bounded, TTL-expiring map from chat id to its current session-webhook URL.
pub struct SessionWebhookCache {
    entries: DashMap<String, CachedWebhook>,
}

impl Default for SessionWebhookCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionWebhookCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn insert(&self, chat_id: impl Into<String>, url: impl Into<String>) {
        if self.entries.len() >= MAX_CACHE_ENTRIES {
            self.evict_oldest();
        }
        self.entries.insert(
            chat_id.into(),
            CachedWebhook {
                url: url.into(),
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn get(&self, chat_id: &str) -> Option<String> {
        let entry = self.entries.get(chat_id)?;
        if entry.inserted_at.elapsed() > SESSION_WEBHOOK_TTL {
            drop(entry);
            self.entries.remove(chat_id);
            return None;
        }
        Some(entry.url.clone())
    }

    fn evict_oldest(&self) {
        if let Some(oldest_key) = self
            .entries
            .iter()
            .min_by_key(|e| e.inserted_at)
            .map(|e| e.key().clone())
        {
            self.entries.remove(&oldest_key);
        }
    }

    /// Remove every expired entry; run periodically by the janitor task.
    pub fn sweep_expired(&self) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.inserted_at.elapsed() > SESSION_WEBHOOK_TTL)
            .map(|e| e.key().clone())
            .collect();
        for key in expired {
            self.entries.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct DingtalkAdapter {
    account_id: String,
    stream_ws_url: String,
    http: reqwest::Client,
    runtime: BaseRuntime,
    webhooks: Arc<SessionWebhookCache>,
}

impl DingtalkAdapter {
    pub fn new(account_id: impl Into<String>, stream_ws_url: impl Into<String>, allowlist: AllowList) -> Self {
        Self {
            account_id: account_id.into(),
            stream_ws_url: stream_ws_url.into(),
            http: reqwest::Client::new(),
            runtime: BaseRuntime::new(allowlist),
            webhooks: Arc::new(SessionWebhookCache::new()),
        }
    }

    async fn run_once(
        &self,
        bus: &MessageBus,
        stop_rx: &mut tokio::sync::watch::Receiver<bool>,
        backoff_delay: &AtomicU64,
    ) -> Result<()> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.stream_ws_url)
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();
        backoff_delay.store(BACKOFF_FLOOR_SECS, Ordering::SeqCst);

        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        return Ok(());
                    }
                }
                frame = read.next() => {
                    let frame = frame.ok_or_else(|| ChannelError::ConnectionFailed("stream closed".into()))?
                        .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;
                    if let WsMessage::Text(text) = frame {
                        if let Some(ack) = self.handle_frame(bus, &text).await? {
                            let _ = write.send(WsMessage::Text(ack)).await;
                        }
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, bus: &MessageBus, text: &str) -> Result<Option<String>> {
        let frame: Value = serde_json::from_str(text)
            .map_err(|e| ChannelError::ConnectionFailed(format!("malformed stream frame: {e}")))?;

        if frame["type"] == "SYSTEM" {
            return Ok(Some(json!({ "code": 200, "message": "OK" }).to_string()));
        }

        let data: Value = frame["data"]
            .as_str()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or(Value::Null);

        let sender_id = data["senderStaffId"].as_str().unwrap_or("").to_string();
        let chat_id = data["conversationId"].as_str().unwrap_or("").to_string();
        let content = data["text"]["content"].as_str().unwrap_or("").trim().to_string();
        let session_webhook = data["sessionWebhook"].as_str().map(str::to_string);

        if sender_id.is_empty() || chat_id.is_empty() {
            return Ok(Some(json!({ "code": 200, "message": "OK" }).to_string()));
        }
        if !self.is_allowed(&sender_id) {
            warn!(sender = %sender_id, "dingtalk: sender not in allowlist, dropping");
            return Ok(Some(json!({ "code": 200, "message": "OK" }).to_string()));
        }
        if let Some(webhook) = session_webhook {
            self.webhooks.insert(chat_id.clone(), webhook);
        }

        let envelope = InboundEnvelope::new("dingtalk", self.account_id.clone(), sender_id, chat_id, content);
        bus.publish_inbound(envelope).await?;

        Ok(Some(json!({ "code": 200, "message": "OK" }).to_string()))
    }

    /// Spawn the janitor that sweeps expired session-webhook entries.
    pub fn spawn_janitor(&self) -> tokio::task::JoinHandle<()> {
        let webhooks = self.webhooks.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(JANITOR_INTERVAL);
            loop {
                ticker.tick().await;
                webhooks.sweep_expired();
            }
        })
    }
}

#[async_trait]
impl Channel for DingtalkAdapter {
    fn name(&self) -> &str {
        "dingtalk"
    }

    fn account_id(&self) -> &str {
        &self.account_id
    }

    async fn start(&self, bus: Arc<MessageBus>) -> Result<()> {
        let mut stop_rx = self.runtime.begin_run();
        let backoff_delay = AtomicU64::new(BACKOFF_FLOOR_SECS);
        info!(account = %self.account_id, "dingtalk: connecting to stream gateway");
        loop {
            if *stop_rx.borrow() {
                return Ok(());
            }
            if let Err(e) = self.run_once(&bus, &mut stop_rx, &backoff_delay).await {
                warn!(error = %e, "dingtalk: stream session ended, reconnecting");
            }
            if *stop_rx.borrow() {
                return Ok(());
            }
            let delay = backoff_delay.load(Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(delay)).await;
            backoff_delay.store((delay * 2).min(BACKOFF_CAP_SECS), Ordering::SeqCst);
        }
    }

    async fn stop(&self) -> Result<()> {
        self.runtime.request_stop();
        Ok(())
    }

    async fn send(&self, envelope: &OutboundEnvelope) -> Result<()> {
        let webhook = self.webhooks.get(&envelope.chat_id).ok_or_else(|| {
            ChannelError::SendFailed(format!(
                "no live session webhook for chat {}; DingTalk requires replying within the active session",
                envelope.chat_id
            ))
        })?;
        let response = self
            .http
            .post(&webhook)
            .json(&json!({ "msgtype": "text", "text": { "content": envelope.content } }))
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ChannelError::SendFailed(format!(
                "session webhook returned status {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.runtime.status()
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        self.runtime.is_allowed(sender_id)
    }
}
