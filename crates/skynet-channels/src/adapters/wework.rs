//! WeWork (Enterprise WeChat) group bot webhook. Inbound callback payloads
//! are AES-256-CBC encrypted; decryption is [`crate::verify::decrypt_wework`].
//! Outbound delivery posts a `msgtype: text` payload to the bot's webhook URL.

use serde_json::{json, Value};
use skynet_core::types::OutboundEnvelope;

use crate::adapters::webhook_common::{OutboundFormatter, WebhookChannel};
use crate::types::AllowList;

struct WeworkFormatter;

impl OutboundFormatter for WeworkFormatter {
    fn format(&self, envelope: &OutboundEnvelope) -> Value {
        json!({
            "msgtype": "text",
            "text": { "content": envelope.content },
        })
    }
}

pub fn new(account_id: impl Into<String>, webhook_url: impl Into<String>, allowlist: AllowList) -> WebhookChannel {
    WebhookChannel::new("wework", account_id, webhook_url, allowlist, Box::new(WeworkFormatter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_plain_text_payload() {
        let formatter = WeworkFormatter;
        let envelope = OutboundEnvelope::new("wework", "corp1", "chat1", "status update");
        let body = formatter.format(&envelope);
        assert_eq!(body["msgtype"], "text");
        assert_eq!(body["text"]["content"], "status update");
    }
}
