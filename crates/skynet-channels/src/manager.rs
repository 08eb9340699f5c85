use std::sync::Arc;

use dashmap::DashMap;
use skynet_bus::MessageBus;
use tracing::{error, info, warn};

use crate::channel::Channel;
use crate::error::ChannelError;
use crate::types::ChannelStatus;

/// Minimum delay between reconnect attempts (seconds).
const BACKOFF_BASE_SECS: u64 = 5;
/// Maximum delay between reconnect attempts (seconds).
const BACKOFF_MAX_SECS: u64 = 300;
/// Maximum number of reconnect attempts before giving up.
const MAX_ATTEMPTS: u32 = 10;
/// Jitter fraction applied to each delay (+/-10%).
const JITTER_FRACTION: f64 = 0.10;

/// Registry of channel adapters, keyed `<name>` or `<name>:<account_id>`
/// when a channel has more than one configured account.
pub struct ChannelManager {
    channels: DashMap<String, Arc<dyn Channel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    pub fn registry_key(name: &str, account_id: &str) -> String {
        if account_id.is_empty() || account_id == "default" {
            name.to_string()
        } else {
            format!("{name}:{account_id}")
        }
    }

    /// Register a channel adapter under `<name>[:<account_id>]`. Rejects an
    /// adapter with an empty name and rejects re-registering an already
    /// occupied key — callers that genuinely want to replace an adapter must
    /// `stop` and remove it first via a fresh `ChannelManager`.
    pub fn register(&self, channel: Arc<dyn Channel>) -> Result<(), ChannelError> {
        if channel.name().is_empty() {
            return Err(ChannelError::ConfigError("channel name must not be empty".into()));
        }
        let key = Self::registry_key(channel.name(), channel.account_id());
        if self.channels.contains_key(&key) {
            return Err(ChannelError::ConfigError(format!(
                "channel '{key}' is already registered"
            )));
        }
        info!(channel = %key, "registering channel adapter");
        self.channels.insert(key, channel);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn Channel>> {
        self.channels.get(key).map(|entry| entry.value().clone())
    }

    /// Start every registered channel, applying exponential backoff with
    /// jitter on failure. Channels are started concurrently; a failure on
    /// one does not prevent the others from starting.
    pub async fn start_all(&self, bus: Arc<MessageBus>) {
        let channels: Vec<(String, Arc<dyn Channel>)> = self
            .channels
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut handles = Vec::new();
        for (key, channel) in channels {
            let bus = bus.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = start_with_backoff(&key, channel.as_ref(), bus).await {
                    error!(channel = %key, error = %e, "failed to start channel after retries");
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    pub async fn stop_all(&self) {
        for entry in self.channels.iter() {
            info!(channel = %entry.key(), "stopping channel");
            if let Err(e) = entry.value().stop().await {
                warn!(channel = %entry.key(), error = %e, "error while stopping channel");
            }
        }
    }

    /// Current status of every registered channel, sorted by key for
    /// deterministic output.
    pub fn statuses(&self) -> Vec<(String, ChannelStatus)> {
        let mut result: Vec<(String, ChannelStatus)> = self
            .channels
            .iter()
            .map(|e| (e.key().clone(), e.value().status()))
            .collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    /// Consume outbound envelopes from the bus forever, dispatching each to
    /// the adapter registered for its `<channel>[:<account_id>]` key. Runs
    /// until the bus is closed.
    pub async fn dispatch_outbound_loop(&self, bus: Arc<MessageBus>) {
        loop {
            match bus.consume_outbound().await {
                Ok(envelope) => {
                    let key = Self::registry_key(&envelope.channel, &envelope.account_id);
                    match self.get(&key).or_else(|| self.get(&envelope.channel)) {
                        Some(channel) => {
                            if let Err(e) = channel.send(&envelope).await {
                                error!(channel = %key, error = %e, "failed to deliver outbound envelope");
                            }
                        }
                        None => warn!(channel = %key, "no adapter registered for outbound envelope"),
                    }
                }
                Err(_) => {
                    info!("outbound dispatch loop exiting: bus closed");
                    break;
                }
            }
        }
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Start a single channel with exponential backoff and jitter.
/// Schedule: 5s -> 10s -> 20s -> ... -> 300s (cap), up to `MAX_ATTEMPTS` tries.
async fn start_with_backoff(
    name: &str,
    channel: &dyn Channel,
    bus: Arc<MessageBus>,
) -> Result<(), ChannelError> {
    let mut delay_secs = BACKOFF_BASE_SECS;

    for attempt in 1..=MAX_ATTEMPTS {
        match channel.start(bus.clone()).await {
            Ok(()) => {
                info!(channel = %name, attempt, "channel started successfully");
                return Ok(());
            }
            Err(e) if attempt == MAX_ATTEMPTS => {
                return Err(e);
            }
            Err(e) => {
                let jitter = jitter_secs(delay_secs);
                let total = delay_secs + jitter;
                warn!(
                    channel = %name,
                    attempt,
                    max = MAX_ATTEMPTS,
                    error = %e,
                    retry_after_secs = total,
                    "channel start failed, retrying with backoff"
                );
                tokio::time::sleep(std::time::Duration::from_secs(total)).await;
                delay_secs = (delay_secs * 2).min(BACKOFF_MAX_SECS);
            }
        }
    }

    unreachable!("backoff loop exited without returning")
}

fn jitter_secs(base_secs: u64) -> u64 {
    let max_jitter = ((base_secs as f64) * JITTER_FRACTION) as u64;
    if max_jitter == 0 {
        return 0;
    }
    rand_range(max_jitter)
}

/// Minimal jitter source: no `rand` dependency in the teacher's stack for
/// this crate, so derive a pseudo-random value from the monotonic clock.
fn rand_range(bound: u64) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos as u64) % bound
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_key_omits_default_account() {
        assert_eq!(ChannelManager::registry_key("telegram", ""), "telegram");
        assert_eq!(ChannelManager::registry_key("telegram", "default"), "telegram");
        assert_eq!(ChannelManager::registry_key("wework", "corp1"), "wework:corp1");
    }
}
