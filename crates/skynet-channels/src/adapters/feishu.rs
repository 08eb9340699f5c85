//! Feishu (Lark) custom bot webhook. Inbound signature verification is
//! [`crate::verify::verify_feishu_sha1`]; outbound delivery posts a
//! `msg_type: text` payload to the bot's webhook URL.

use skynet_core::types::OutboundEnvelope;
use serde_json::{json, Value};

use crate::adapters::webhook_common::{OutboundFormatter, WebhookChannel};
use crate::types::AllowList;

struct FeishuFormatter;

impl OutboundFormatter for FeishuFormatter {
    fn format(&self, envelope: &OutboundEnvelope) -> Value {
        json!({
            "msg_type": "text",
            "content": { "text": envelope.content },
        })
    }
}

pub fn new(account_id: impl Into<String>, webhook_url: impl Into<String>, allowlist: AllowList) -> WebhookChannel {
    WebhookChannel::new("feishu", account_id, webhook_url, allowlist, Box::new(FeishuFormatter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_plain_text_payload() {
        let formatter = FeishuFormatter;
        let envelope = OutboundEnvelope::new("feishu", "acct", "chat1", "hi there");
        let body = formatter.format(&envelope);
        assert_eq!(body["msg_type"], "text");
        assert_eq!(body["content"]["text"], "hi there");
    }
}
