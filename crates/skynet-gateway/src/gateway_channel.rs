//! The JSON-RPC gateway's own presence on the channel bus.
//!
//! `agent`/`agent.wait` publish an `Inbound` envelope with `channel:"gateway"`
//! and consume the matching `Outbound` reply through this adapter rather
//! than through a real external transport. It is registered in the
//! `ChannelManager` under the name `"gateway"` exactly like any other
//! adapter, so the shared outbound-dispatch loop needs no special case.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use skynet_bus::MessageBus;
use skynet_channels::{AllowList, BaseRuntime, Channel, ChannelStatus};
use skynet_channels::error::Result;
use skynet_core::types::OutboundEnvelope;
use tokio::sync::oneshot;

pub struct GatewayChannel {
    runtime: BaseRuntime,
    waiters: DashMap<String, oneshot::Sender<OutboundEnvelope>>,
}

impl Default for GatewayChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayChannel {
    pub fn new() -> Self {
        Self {
            runtime: BaseRuntime::new(AllowList::default()),
            waiters: DashMap::new(),
        }
    }

    /// Register interest in the next outbound envelope for `chat_id`.
    /// Replaces any prior waiter for the same key — only one `agent.wait`
    /// can be in flight per chat at a time.
    pub fn register_waiter(&self, chat_id: &str) -> oneshot::Receiver<OutboundEnvelope> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(chat_id.to_string(), tx);
        rx
    }
}

#[async_trait]
impl Channel for GatewayChannel {
    fn name(&self) -> &str {
        "gateway"
    }

    fn account_id(&self) -> &str {
        "default"
    }

    async fn start(&self, _bus: Arc<MessageBus>) -> Result<()> {
        let _ = self.runtime.begin_run();
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.runtime.request_stop();
        Ok(())
    }

    /// Deliver to whoever is waiting on this `chat_id`, if anyone. A plain
    /// (non-waiting) `agent` call has no registered waiter, so the reply is
    /// dropped here — that call only ever promised a "queued" acknowledgement.
    async fn send(&self, envelope: &OutboundEnvelope) -> Result<()> {
        if let Some((_, tx)) = self.waiters.remove(&envelope.chat_id) {
            let _ = tx.send(envelope.clone());
        }
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.runtime.status()
    }

    fn is_allowed(&self, _sender_id: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_wakes_a_registered_waiter() {
        let gw = GatewayChannel::new();
        let rx = gw.register_waiter("chat1");
        let envelope = OutboundEnvelope::new("gateway", "default", "chat1", "hi");
        gw.send(&envelope).await.unwrap();
        let received = rx.await.unwrap();
        assert_eq!(received.content, "hi");
    }

    #[tokio::test]
    async fn send_with_no_waiter_is_a_silent_noop() {
        let gw = GatewayChannel::new();
        let envelope = OutboundEnvelope::new("gateway", "default", "chat1", "hi");
        assert!(gw.send(&envelope).await.is_ok());
    }
}
