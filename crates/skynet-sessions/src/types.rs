use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skynet_core::types::Message;

/// Header line written first in every session's JSONL file, carrying the
/// original (pre-sanitization) key so a file can be matched back to its key
/// even after filesystem sanitization collapsed distinct keys onto the same
/// base filename.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHeader {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A fully materialized session: its header plus the ordered message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub header: SessionHeader,
    pub messages: Vec<Message>,
}

impl SessionRecord {
    pub fn new(key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            header: SessionHeader {
                key: key.into(),
                created_at: now,
                updated_at: now,
            },
            messages: Vec::new(),
        }
    }
}

/// Lightweight summary returned by `list`, without loading the full message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}
