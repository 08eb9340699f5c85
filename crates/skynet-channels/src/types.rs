use serde::{Deserialize, Serialize};

/// Runtime lifecycle state of a channel adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// Registered but `start` has not been called yet.
    Created,
    /// `start` was called and the adapter is actively connected/polling.
    Running,
    /// `stop` completed; `start` may be called again.
    Stopped,
    /// An unrecoverable (or pre-retry) error occurred.
    Error(String),
}

/// Per-channel (or per-account) sender allowlist. An empty list means
/// "allow everyone" — the common case for a freshly configured channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllowList {
    pub allowed_ids: Vec<String>,
}

impl AllowList {
    pub fn new(allowed_ids: Vec<String>) -> Self {
        Self { allowed_ids }
    }

    pub fn is_allowed(&self, sender_id: &str) -> bool {
        self.allowed_ids.is_empty() || self.allowed_ids.iter().any(|id| id == sender_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allowlist_allows_everyone() {
        assert!(AllowList::default().is_allowed("anyone"));
    }

    #[test]
    fn nonempty_allowlist_restricts_to_members() {
        let list = AllowList::new(vec!["u1".into()]);
        assert!(list.is_allowed("u1"));
        assert!(!list.is_allowed("u2"));
    }
}
