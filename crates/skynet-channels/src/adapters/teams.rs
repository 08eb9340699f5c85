//! Microsoft Teams incoming webhook connector (Adaptive Card or legacy
//! `MessageCard` format). Outbound delivery posts a minimal `MessageCard`.

use serde_json::{json, Value};
use skynet_core::types::OutboundEnvelope;

use crate::adapters::webhook_common::{OutboundFormatter, WebhookChannel};
use crate::types::AllowList;

struct TeamsFormatter;

impl OutboundFormatter for TeamsFormatter {
    fn format(&self, envelope: &OutboundEnvelope) -> Value {
        json!({
            "@type": "MessageCard",
            "@context": "http://schema.org/extensions",
            "text": envelope.content,
        })
    }
}

pub fn new(account_id: impl Into<String>, webhook_url: impl Into<String>, allowlist: AllowList) -> WebhookChannel {
    WebhookChannel::new("teams", account_id, webhook_url, allowlist, Box::new(TeamsFormatter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_message_card() {
        let formatter = TeamsFormatter;
        let envelope = OutboundEnvelope::new("teams", "acct", "chan1", "build green");
        let body = formatter.format(&envelope);
        assert_eq!(body["@type"], "MessageCard");
        assert_eq!(body["text"], "build green");
    }
}
