//! Routes server-initiated notifications (`agent.stream.event`,
//! `agent.stream.end`) back to the WebSocket connection that requested them.

use dashmap::DashMap;
use skynet_protocol::RpcNotification;
use tokio::sync::mpsc;

/// Keyed by connection/session id. Each WS connection registers its own
/// outgoing-frame sender on connect and deregisters it on disconnect.
#[derive(Default)]
pub struct SessionNotifier {
    senders: DashMap<String, mpsc::Sender<String>>,
}

impl SessionNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session_id: &str, sender: mpsc::Sender<String>) {
        self.senders.insert(session_id.to_string(), sender);
    }

    pub fn unregister(&self, session_id: &str) {
        self.senders.remove(session_id);
    }

    /// Best-effort push — if the connection already dropped, this is a no-op.
    pub async fn push(&self, session_id: &str, notification: RpcNotification) {
        let Some(sender) = self.senders.get(session_id).map(|e| e.clone()) else {
            return;
        };
        if let Ok(json) = serde_json::to_string(&notification) {
            let _ = sender.send(json).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_delivers_to_registered_session() {
        let notifier = SessionNotifier::new();
        let (tx, mut rx) = mpsc::channel(4);
        notifier.register("s1", tx);
        notifier
            .push("s1", RpcNotification::new("agent.stream.event", serde_json::json!({"x": 1})))
            .await;
        let line = rx.recv().await.unwrap();
        assert!(line.contains("agent.stream.event"));
    }

    #[tokio::test]
    async fn push_to_unknown_session_is_a_noop() {
        let notifier = SessionNotifier::new();
        notifier
            .push("missing", RpcNotification::new("agent.stream.end", serde_json::json!({})))
            .await;
    }
}
