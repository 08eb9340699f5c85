//! Shared plumbing for webhook-style channels (feishu, wework, slack, teams,
//! google_chat): inbound arrives as an HTTP POST handled by the gateway
//! (which verifies the signature and publishes onto the bus directly), so
//! these adapters only need to implement outbound delivery and status.

use std::sync::Arc;

use async_trait::async_trait;
use skynet_bus::MessageBus;
use skynet_core::types::OutboundEnvelope;

use crate::channel::{BaseRuntime, Channel};
use crate::error::{ChannelError, Result};
use crate::types::AllowList;

/// How a webhook channel turns an envelope into the platform's expected
/// outbound JSON body.
pub trait OutboundFormatter: Send + Sync {
    fn format(&self, envelope: &OutboundEnvelope) -> serde_json::Value;
}

/// A channel whose inbound path is an HTTP webhook (handled upstream by the
/// gateway) and whose outbound path is a single `POST` of platform-specific
/// JSON to a fixed webhook URL.
pub struct WebhookChannel {
    name: String,
    account_id: String,
    webhook_url: String,
    http: reqwest::Client,
    runtime: BaseRuntime,
    formatter: Box<dyn OutboundFormatter>,
}

impl WebhookChannel {
    pub fn new(
        name: impl Into<String>,
        account_id: impl Into<String>,
        webhook_url: impl Into<String>,
        allowlist: AllowList,
        formatter: Box<dyn OutboundFormatter>,
    ) -> Self {
        Self {
            name: name.into(),
            account_id: account_id.into(),
            webhook_url: webhook_url.into(),
            http: reqwest::Client::new(),
            runtime: BaseRuntime::new(allowlist),
            formatter,
        }
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Webhook channels have no connection to maintain; `start` only marks
    /// the adapter as running so its status reflects "ready to send".
    async fn start(&self, _bus: Arc<MessageBus>) -> Result<()> {
        let _ = self.runtime.begin_run();
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.runtime.request_stop();
        Ok(())
    }

    async fn send(&self, envelope: &OutboundEnvelope) -> Result<()> {
        let body = self.formatter.format(envelope);
        let response = self
            .http
            .post(&self.webhook_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ChannelError::SendFailed(format!(
                "webhook returned status {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn status(&self) -> crate::types::ChannelStatus {
        self.runtime.status()
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        self.runtime.is_allowed(sender_id)
    }
}
