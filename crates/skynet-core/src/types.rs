use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Media kind carried on an envelope or a session message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Image,
    Video,
    Audio,
    Document,
}

/// A single media attachment.
///
/// `url` and `base64` are both optional so a channel adapter can pick
/// whichever representation it natively produces; a consumer that needs
/// the other form is expected to fetch/decode on demand. URLs are always
/// absolute once copied into an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    #[serde(rename = "type")]
    pub media_type: MediaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
    pub mime_type: String,
}

/// A message arriving from a channel adapter, destined for the agent.
///
/// Immutable once published onto the bus; consumed exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEnvelope {
    pub id: String,
    pub channel: String,
    pub account_id: String,
    pub sender_id: String,
    pub chat_id: String,
    pub content: String,
    #[serde(default)]
    pub media: Vec<Media>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl InboundEnvelope {
    pub fn new(
        channel: impl Into<String>,
        account_id: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            channel: channel.into(),
            account_id: account_id.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            media: Vec::new(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// The session key this envelope belongs to: `<channel>:<chat_id>`.
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }
}

/// A message produced by the agent, destined for a channel adapter.
///
/// Created by the agent; consumed exactly once by the channel manager's
/// outbound dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    pub id: String,
    pub channel: String,
    pub account_id: String,
    pub chat_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub media: Vec<Media>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl OutboundEnvelope {
    pub fn new(
        channel: impl Into<String>,
        account_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            channel: channel.into(),
            account_id: account_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            reply_to: None,
            media: Vec::new(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }
}

/// A single chunk of a streaming agent response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub content: String,
    #[serde(default)]
    pub is_thinking: bool,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Role of a session message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// A tool call recorded on an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// A single entry in a session's message history.
///
/// Ordered by insertion, not by `timestamp` — callers must not re-sort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub media: Vec<Media>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            media: Vec::new(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            media: Vec::new(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_session_key_joins_channel_and_chat() {
        let env = InboundEnvelope::new("telegram", "", "u1", "c1", "hi");
        assert_eq!(env.session_key(), "telegram:c1");
    }

    #[test]
    fn media_round_trips_through_json() {
        let m = Media {
            media_type: MediaType::Image,
            url: Some("https://example.com/a.png".into()),
            base64: None,
            mime_type: "image/png".into(),
        };
        let json = serde_json::to_string(&m).unwrap();
        let back: Media = serde_json::from_str(&json).unwrap();
        assert_eq!(back.mime_type, "image/png");
        assert_eq!(back.url.as_deref(), Some("https://example.com/a.png"));
    }
}
