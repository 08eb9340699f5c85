use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serenity::all::{ChannelId, GatewayIntents, Http, Message, Ready};
use serenity::client::{Client, Context, EventHandler};
use skynet_bus::MessageBus;
use skynet_channels::{BaseRuntime, Channel, ChannelError, ChannelStatus};
use skynet_core::types::{InboundEnvelope, OutboundEnvelope};
use tracing::{error, info, warn};

/// Discord channel adapter. Wraps a serenity `Client` and drives the gateway
/// event loop for the lifetime of a single `start`/`stop` cycle; `start` may
/// be called again after `stop` to reconnect from scratch.
pub struct DiscordAdapter {
    account_id: String,
    bot_token: String,
    allowlist: skynet_channels::AllowList,
    runtime: BaseRuntime,
    http: Mutex<Option<Arc<Http>>>,
    shard_manager: Mutex<Option<Arc<serenity::gateway::ShardManager>>>,
}

impl DiscordAdapter {
    pub fn new(
        account_id: impl Into<String>,
        bot_token: impl Into<String>,
        allowlist: skynet_channels::AllowList,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            bot_token: bot_token.into(),
            runtime: BaseRuntime::new(allowlist.clone()),
            allowlist,
            http: Mutex::new(None),
            shard_manager: Mutex::new(None),
        }
    }
}

struct Handler {
    bus: Arc<MessageBus>,
    account_id: String,
    allowlist: skynet_channels::AllowList,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(bot = %ready.user.name, "discord: gateway ready");
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let sender_id = msg.author.id.to_string();
        if !self.allowlist.is_allowed(&sender_id) {
            warn!(sender = %sender_id, "discord: sender not in allowlist, dropping");
            return;
        }
        let envelope = InboundEnvelope::new(
            "discord",
            self.account_id.clone(),
            sender_id,
            msg.channel_id.to_string(),
            msg.content.clone(),
        );
        if let Err(e) = self.bus.publish_inbound(envelope).await {
            error!(error = %e, "discord: failed to publish inbound envelope");
        }
    }
}

#[async_trait]
impl Channel for DiscordAdapter {
    fn name(&self) -> &str {
        "discord"
    }

    fn account_id(&self) -> &str {
        &self.account_id
    }

    async fn start(&self, bus: Arc<MessageBus>) -> Result<(), ChannelError> {
        let _stop_rx = self.runtime.begin_run();

        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        let handler = Handler {
            bus,
            account_id: self.account_id.clone(),
            allowlist: self.allowlist.clone(),
        };

        let mut client = Client::builder(&self.bot_token, intents)
            .event_handler(handler)
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        *self.http.lock().unwrap() = Some(client.http.clone());
        *self.shard_manager.lock().unwrap() = Some(client.shard_manager.clone());

        tokio::spawn(async move {
            if let Err(e) = client.start().await {
                warn!(error = %e, "discord: gateway client stopped with error");
            }
        });

        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        if let Some(manager) = self.shard_manager.lock().unwrap().take() {
            manager.shutdown_all().await;
        }
        self.runtime.request_stop();
        Ok(())
    }

    async fn send(&self, envelope: &OutboundEnvelope) -> Result<(), ChannelError> {
        let http = self
            .http
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ChannelError::SendFailed("discord adapter not started".into()))?;
        let channel_id: u64 = envelope
            .chat_id
            .parse()
            .map_err(|_| ChannelError::SendFailed(format!("invalid channel id: {}", envelope.chat_id)))?;

        ChannelId::new(channel_id)
            .say(&http, &envelope.content)
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
