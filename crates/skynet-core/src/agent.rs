use async_trait::async_trait;
use thiserror::Error;

use crate::types::{InboundEnvelope, OutboundEnvelope, StreamChunk};

/// Error surfaced by an `AgentHandler`. Kept separate from `SkynetError`
/// since agent failures are reported back to the caller (`agent.wait`,
/// webhook forwarder) rather than propagated as transport/fatal errors.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent execution failed: {0}")]
    Execution(String),
    #[error("agent timed out after {ms}ms")]
    Timeout { ms: u64 },
    #[error("agent cancelled")]
    Cancelled,
}

/// The boundary between the orchestrator and whatever drives the actual
/// model calls and tool loop. Concrete provider clients, prompt assembly,
/// and tool execution all live on the other side of this trait and are
/// out of scope here; the orchestrator only ever talks to an `AgentHandler`.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    /// Produce a single complete reply for one inbound envelope.
    async fn handle(&self, inbound: InboundEnvelope) -> Result<OutboundEnvelope, AgentError>;

    /// Produce a reply incrementally, invoking `on_chunk` once per chunk.
    /// The final chunk delivered has `is_final` (and, once all output has
    /// been flushed, `is_complete`) set.
    async fn handle_stream(
        &self,
        inbound: InboundEnvelope,
        on_chunk: Box<dyn FnMut(StreamChunk) + Send>,
    ) -> Result<(), AgentError>;
}

/// Trivial handler that echoes the inbound content back unchanged. Used to
/// exercise the bus/session/gateway plumbing without a real model behind it.
pub struct EchoAgent;

#[async_trait]
impl AgentHandler for EchoAgent {
    async fn handle(&self, inbound: InboundEnvelope) -> Result<OutboundEnvelope, AgentError> {
        Ok(OutboundEnvelope::new(
            inbound.channel,
            inbound.account_id,
            inbound.chat_id,
            inbound.content,
        ))
    }

    async fn handle_stream(
        &self,
        inbound: InboundEnvelope,
        mut on_chunk: Box<dyn FnMut(StreamChunk) + Send>,
    ) -> Result<(), AgentError> {
        on_chunk(StreamChunk {
            content: inbound.content,
            is_thinking: false,
            is_final: true,
            is_complete: true,
            error: None,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_agent_returns_same_content() {
        let agent = EchoAgent;
        let inbound = InboundEnvelope::new("telegram", "acct1", "u1", "c1", "hello");
        let out = agent.handle(inbound).await.unwrap();
        assert_eq!(out.content, "hello");
        assert_eq!(out.chat_id, "c1");
    }

    #[tokio::test]
    async fn echo_agent_stream_emits_one_final_chunk() {
        let agent = EchoAgent;
        let inbound = InboundEnvelope::new("telegram", "acct1", "u1", "c1", "hi");
        let chunks = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let chunks_clone = chunks.clone();
        agent
            .handle_stream(
                inbound,
                Box::new(move |chunk| chunks_clone.lock().unwrap().push(chunk)),
            )
            .await
            .unwrap();
        let chunks = chunks.lock().unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_final);
        assert!(chunks[0].is_complete);
    }
}
