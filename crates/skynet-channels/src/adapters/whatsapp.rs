//! WhatsApp channel adapter.
//!
//! WhatsApp has no first-party bot API; this talks to a local HTTP bridge
//! process (e.g. a whatsapp-web.js sidecar) that exposes `GET /messages?since=`
//! for new inbound messages and `POST /send` for outbound delivery. Drives a
//! long-polling loop until stopped, mirroring the long-polling shape used for
//! Telegram but over a generic HTTP bridge instead of teloxide.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use skynet_bus::MessageBus;
use skynet_core::types::{InboundEnvelope, OutboundEnvelope};
use tracing::{info, warn};

use crate::channel::{BaseRuntime, Channel};
use crate::error::{ChannelError, Result};
use crate::types::{AllowList, ChannelStatus};

const POLL_INTERVAL_MS: u64 = 2000;

#[derive(Debug, Deserialize)]
struct BridgeMessage {
    sender_id: String,
    chat_id: String,
    content: String,
    #[serde(default)]
    cursor: i64,
}

pub struct WhatsappAdapter {
    account_id: String,
    bridge_url: String,
    http: reqwest::Client,
    runtime: BaseRuntime,
    cursor: AtomicI64,
}

impl WhatsappAdapter {
    pub fn new(account_id: impl Into<String>, bridge_url: impl Into<String>, allowlist: AllowList) -> Self {
        Self {
            account_id: account_id.into(),
            bridge_url: bridge_url.into(),
            http: reqwest::Client::new(),
            runtime: BaseRuntime::new(allowlist),
            cursor: AtomicI64::new(0),
        }
    }

    async fn poll_once(&self, bus: &MessageBus) -> Result<()> {
        let since = self.cursor.load(Ordering::Acquire);
        let url = format!("{}/messages?since={since}", self.bridge_url);
        let messages: Vec<BridgeMessage> = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        for message in messages {
            if !self.is_allowed(&message.sender_id) {
                warn!(sender = %message.sender_id, "whatsapp: sender not in allowlist, dropping");
                continue;
            }
            let envelope = InboundEnvelope::new(
                "whatsapp",
                self.account_id.clone(),
                message.sender_id,
                message.chat_id,
                message.content,
            );
            self.cursor.store(message.cursor, Ordering::Release);
            bus.publish_inbound(envelope).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for WhatsappAdapter {
    fn name(&self) -> &str {
        "whatsapp"
    }

    fn account_id(&self) -> &str {
        &self.account_id
    }

    async fn start(&self, bus: Arc<MessageBus>) -> Result<()> {
        let mut stop_rx = self.runtime.begin_run();
        info!(account = %self.account_id, "whatsapp: starting long-poll loop");

        loop {
            if *stop_rx.borrow() {
                break;
            }
            if let Err(e) = self.poll_once(&bus).await {
                warn!(error = %e, "whatsapp: poll failed, will retry");
            }
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_millis(POLL_INTERVAL_MS)) => {}
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.runtime.request_stop();
        Ok(())
    }

    async fn send(&self, envelope: &OutboundEnvelope) -> Result<()> {
        let url = format!("{}/send", self.bridge_url);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": envelope.chat_id,
                "content": envelope.content,
            }))
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ChannelError::SendFailed(format!(
                "bridge returned status {}",
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_adapter_starts_in_created_state() {
        let adapter = WhatsappAdapter::new("acct1", "http://localhost:9001", AllowList::default());
        assert_eq!(adapter.status(), ChannelStatus::Created);
    }
}
