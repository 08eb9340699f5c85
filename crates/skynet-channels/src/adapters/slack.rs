//! Slack incoming webhook. Inbound signature verification follows Slack's
//! `v0=<hmac-sha256>` scheme, handled via [`crate::verify::verify_hmac_sha256`]
//! on the `"v0:{timestamp}:{body}"` base string at the gateway layer.

use serde_json::{json, Value};
use skynet_core::types::OutboundEnvelope;

use crate::adapters::webhook_common::{OutboundFormatter, WebhookChannel};
use crate::types::AllowList;

struct SlackFormatter;

impl OutboundFormatter for SlackFormatter {
    fn format(&self, envelope: &OutboundEnvelope) -> Value {
        json!({ "text": envelope.content })
    }
}

pub fn new(account_id: impl Into<String>, webhook_url: impl Into<String>, allowlist: AllowList) -> WebhookChannel {
    WebhookChannel::new("slack", account_id, webhook_url, allowlist, Box::new(SlackFormatter))
}

/// Build the base string Slack signs: `v0:{timestamp}:{raw_body}`.
pub fn signing_base_string(timestamp: &str, raw_body: &str) -> String {
    format!("v0:{timestamp}:{raw_body}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_plain_text_payload() {
        let formatter = SlackFormatter;
        let envelope = OutboundEnvelope::new("slack", "acct", "chan1", "hello");
        assert_eq!(formatter.format(&envelope)["text"], "hello");
    }

    #[test]
    fn signing_base_string_matches_slack_format() {
        assert_eq!(signing_base_string("123", "{}"), "v0:123:{}");
    }
}
