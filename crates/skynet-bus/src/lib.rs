//! Central inbound/outbound routing between channel adapters and the agent.
//!
//! ```text
//! Telegram ──┐
//! Discord ───┼──▶ Inbound ──▶ Agent ──▶ Outbound ──┐
//! WhatsApp ──┤                                     ├──▶ Channel Manager
//! Cron ──────┘                                     └──▶ Adapters
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use skynet_core::types::{InboundEnvelope, OutboundEnvelope};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus closed")]
    Closed,
    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, BusError>;

/// Bounded FIFO queues connecting channel adapters to the agent.
///
/// Every envelope published is delivered to exactly one consumer. `close`
/// is idempotent and wakes every task currently blocked in `consume_*`.
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundEnvelope>,
    inbound_rx: Arc<Mutex<mpsc::Receiver<InboundEnvelope>>>,
    outbound_tx: mpsc::Sender<OutboundEnvelope>,
    outbound_rx: Arc<Mutex<mpsc::Receiver<OutboundEnvelope>>>,
    closed: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl MessageBus {
    pub fn new(buffer_size: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(buffer_size);
        let (outbound_tx, outbound_rx) = mpsc::channel(buffer_size);

        Self {
            inbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            outbound_tx,
            outbound_rx: Arc::new(Mutex::new(outbound_rx)),
            closed: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the bus closed and wake every task blocked in a `consume_*`
    /// call. Safe to call more than once.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("message bus closed");
        }
        self.cancel.cancel();
    }

    pub async fn publish_inbound(&self, envelope: InboundEnvelope) -> Result<()> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        self.inbound_tx
            .send(envelope)
            .await
            .map_err(|_| BusError::Closed)
    }

    pub async fn publish_outbound(&self, envelope: OutboundEnvelope) -> Result<()> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        self.outbound_tx
            .send(envelope)
            .await
            .map_err(|_| BusError::Closed)
    }

    /// Wait for the next inbound envelope, or return `Cancelled`/`Closed`
    /// if the bus is closed first.
    pub async fn consume_inbound(&self) -> Result<InboundEnvelope> {
        let mut rx = self.inbound_rx.lock().await;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BusError::Cancelled),
            msg = rx.recv() => msg.ok_or(BusError::Closed),
        }
    }

    pub async fn consume_outbound(&self) -> Result<OutboundEnvelope> {
        let mut rx = self.outbound_rx.lock().await;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BusError::Cancelled),
            msg = rx.recv() => msg.ok_or(BusError::Closed),
        }
    }

    /// A clonable handle for publishers that don't need the consumer side.
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundEnvelope> {
        self.inbound_tx.clone()
    }

    pub fn outbound_sender(&self) -> mpsc::Sender<OutboundEnvelope> {
        self.outbound_tx.clone()
    }
}

impl Clone for MessageBus {
    fn clone(&self) -> Self {
        Self {
            inbound_tx: self.inbound_tx.clone(),
            inbound_rx: Arc::clone(&self.inbound_rx),
            outbound_tx: self.outbound_tx.clone(),
            outbound_rx: Arc::clone(&self.outbound_rx),
            closed: Arc::clone(&self.closed),
            cancel: self.cancel.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_consume_round_trip() {
        let bus = MessageBus::new(10);
        let inbound = InboundEnvelope::new("telegram", "acct1", "u1", "c1", "hello agent");
        bus.publish_inbound(inbound.clone()).await.unwrap();

        let received = bus.consume_inbound().await.unwrap();
        assert_eq!(received.channel, "telegram");
        assert_eq!(received.content, "hello agent");

        let outbound = OutboundEnvelope::new("telegram", "acct1", "c1", "hi user");
        bus.publish_outbound(outbound).await.unwrap();
        let response = bus.consume_outbound().await.unwrap();
        assert_eq!(response.content, "hi user");
    }

    #[tokio::test]
    async fn each_envelope_is_delivered_exactly_once() {
        let bus = MessageBus::new(10);
        for i in 0..5 {
            bus.publish_inbound(InboundEnvelope::new("cli", "", "u", "c", format!("msg{i}")))
                .await
                .unwrap();
        }
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(bus.consume_inbound().await.unwrap().content);
        }
        seen.sort();
        assert_eq!(
            seen,
            vec!["msg0", "msg1", "msg2", "msg3", "msg4"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn publish_after_close_fails() {
        let bus = MessageBus::new(10);
        bus.close();
        let result = bus
            .publish_inbound(InboundEnvelope::new("cli", "", "u", "c", "x"))
            .await;
        assert!(matches!(result, Err(BusError::Closed)));
    }

    #[tokio::test]
    async fn close_wakes_blocked_consumer() {
        let bus = Arc::new(MessageBus::new(1));
        let waiter_bus = bus.clone();
        let waiter = tokio::spawn(async move { waiter_bus.consume_inbound().await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        bus.close();

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("consumer should wake promptly after close")
            .unwrap();
        assert!(matches!(result, Err(BusError::Cancelled)));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let bus = MessageBus::new(10);
        bus.close();
        bus.close();
        assert!(bus.is_closed());
    }
}
