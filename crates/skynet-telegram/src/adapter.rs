use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use skynet_bus::MessageBus;
use skynet_channels::{BaseRuntime, Channel, ChannelError, ChannelStatus};
use skynet_core::types::{InboundEnvelope, OutboundEnvelope};
use teloxide::prelude::*;
use teloxide::dispatching::ShutdownToken;
use tracing::{error, info, warn};

/// Telegram channel adapter. Wraps a teloxide `Bot` and drives the long-polling
/// `Dispatcher` for the lifetime of a single `start`/`stop` cycle; `start` may
/// be called again after `stop` to poll from scratch.
pub struct TelegramAdapter {
    account_id: String,
    bot_token: String,
    allowlist: skynet_channels::AllowList,
    runtime: BaseRuntime,
    bot: Mutex<Option<Bot>>,
    shutdown: Mutex<Option<ShutdownToken>>,
}

impl TelegramAdapter {
    /// Builds the adapter, rejecting a malformed `bot_token`. Telegram bot
    /// tokens are `<bot id digits>:<secret>` with no `bot` prefix and no
    /// whitespace; the secret portion comes straight from BotFather and is
    /// never validated beyond non-emptiness here.
    pub fn new(
        account_id: impl Into<String>,
        bot_token: impl Into<String>,
        allowlist: skynet_channels::AllowList,
    ) -> Result<Self, ChannelError> {
        let bot_token = bot_token.into();
        validate_bot_token(&bot_token)?;
        Ok(Self {
            account_id: account_id.into(),
            bot_token,
            runtime: BaseRuntime::new(allowlist.clone()),
            allowlist,
            bot: Mutex::new(None),
            shutdown: Mutex::new(None),
        })
    }
}

/// Validates the `<digits>:<secret>` shape Telegram issues bot tokens in.
fn validate_bot_token(token: &str) -> Result<(), ChannelError> {
    if token.chars().any(char::is_whitespace) {
        return Err(ChannelError::ConfigError(
            "telegram bot token must not contain whitespace".into(),
        ));
    }
    let Some((id, secret)) = token.split_once(':') else {
        return Err(ChannelError::ConfigError(
            "telegram bot token must be in <id>:<secret> form".into(),
        ));
    };
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(ChannelError::ConfigError(
            "telegram bot token id segment must be all digits".into(),
        ));
    }
    if secret.is_empty() {
        return Err(ChannelError::ConfigError(
            "telegram bot token secret segment must not be empty".into(),
        ));
    }
    Ok(())
}

async fn handle_message(
    bot: Bot,
    msg: Message,
    bus: Arc<MessageBus>,
    account_id: String,
    allowlist: skynet_channels::AllowList,
) -> ResponseResult<()> {
    let _ = &bot;
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let sender_id = msg
        .from
        .as_ref()
        .map(|u| u.id.to_string())
        .unwrap_or_default();
    if sender_id.is_empty() || !allowlist.is_allowed(&sender_id) {
        warn!(sender = %sender_id, "telegram: sender not in allowlist, dropping");
        return Ok(());
    }
    let envelope = InboundEnvelope::new(
        "telegram",
        account_id,
        sender_id,
        msg.chat.id.to_string(),
        text.to_string(),
    );
    if let Err(e) = bus.publish_inbound(envelope).await {
        error!(error = %e, "telegram: failed to publish inbound envelope");
    }
    Ok(())
}

#[async_trait]
impl Channel for TelegramAdapter {
    fn name(&self) -> &str {
        "telegram"
    }

    fn account_id(&self) -> &str {
        &self.account_id
    }

    async fn start(&self, bus: Arc<MessageBus>) -> Result<(), ChannelError> {
        let _stop_rx = self.runtime.begin_run();

        let bot = Bot::new(&self.bot_token);
        *self.bot.lock().unwrap() = Some(bot.clone());

        let account_id = self.account_id.clone();
        let allowlist = self.allowlist.clone();
        let handler = Update::filter_message().endpoint(handle_message);

        let mut dispatcher = Dispatcher::builder(bot, handler)
            .dependencies(dptree::deps![bus, account_id, allowlist])
            .default_handler(|_upd| async {})
            .build();

        *self.shutdown.lock().unwrap() = Some(dispatcher.shutdown_token());

        tokio::spawn(async move {
            info!("telegram: starting long-polling dispatcher");
            dispatcher.dispatch().await;
        });

        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        if let Some(token) = self.shutdown.lock().unwrap().take() {
            let _ = token.shutdown();
        }
        self.runtime.request_stop();
        Ok(())
    }

    async fn send(&self, envelope: &OutboundEnvelope) -> Result<(), ChannelError> {
        let bot = self
            .bot
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ChannelError::SendFailed("telegram adapter not started".into()))?;
        let chat_id: i64 = envelope
            .chat_id
            .parse()
            .map_err(|_| ChannelError::SendFailed(format!("invalid chat id: {}", envelope.chat_id)))?;

        bot.send_message(ChatId(chat_id), &envelope.content)
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.runtime.status()
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        self.runtime.is_allowed(sender_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_a_well_formed_token() {
        assert!(validate_bot_token("123456789:ABCdefGhIJKlmNoPQRstuVWXyz").is_ok());
    }

    #[test]
    fn rejects_missing_colon() {
        assert!(validate_bot_token("123456789ABCdef").is_err());
    }

    #[test]
    fn rejects_non_numeric_id_segment() {
        assert!(validate_bot_token("bot123456789:ABCdef").is_err());
    }

    #[test]
    fn rejects_whitespace() {
        assert!(validate_bot_token("123456789: ABCdef").is_err());
    }

    #[test]
    fn rejects_empty_secret() {
        assert!(validate_bot_token("123456789:").is_err());
    }

    #[test]
    fn new_surfaces_config_error_for_malformed_token() {
        let err = TelegramAdapter::new("acct1", "not-a-token", skynet_channels::AllowList::default());
        assert!(matches!(err, Err(ChannelError::ConfigError(_))));
    }
}
