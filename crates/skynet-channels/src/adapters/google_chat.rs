//! Google Chat incoming webhook. Outbound delivery posts a `text` message
//! to the space's webhook URL.

use serde_json::{json, Value};
use skynet_core::types::OutboundEnvelope;

use crate::adapters::webhook_common::{OutboundFormatter, WebhookChannel};
use crate::types::AllowList;

struct GoogleChatFormatter;

impl OutboundFormatter for GoogleChatFormatter {
    fn format(&self, envelope: &OutboundEnvelope) -> Value {
        json!({ "text": envelope.content })
    }
}

pub fn new(account_id: impl Into<String>, webhook_url: impl Into<String>, allowlist: AllowList) -> WebhookChannel {
    WebhookChannel::new(
        "google_chat",
        account_id,
        webhook_url,
        allowlist,
        Box::new(GoogleChatFormatter),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_plain_text_payload() {
        let formatter = GoogleChatFormatter;
        let envelope = OutboundEnvelope::new("google_chat", "acct", "space1", "hi");
        assert_eq!(formatter.format(&envelope)["text"], "hi");
    }
}
