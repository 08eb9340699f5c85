use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use skynet_bus::MessageBus;
use skynet_core::types::{OutboundEnvelope, StreamChunk};
use tokio::sync::watch;

use crate::error::ChannelError;
use crate::types::{AllowList, ChannelStatus};

/// Common interface implemented by every channel adapter.
///
/// Implementations must be `Send + Sync` so they can be stored in a
/// [`crate::manager::ChannelManager`] and driven from a dedicated Tokio task.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier for this channel (e.g. `"telegram"`).
    fn name(&self) -> &str;

    /// The account this instance of the adapter is logged in as. `"default"`
    /// when the channel has no concept of multiple accounts.
    fn account_id(&self) -> &str;

    /// Begin polling/connecting and publishing inbound envelopes onto `bus`
    /// until `stop` is called. Each call to `start` must create a fresh
    /// stop signal so a channel can be stopped and restarted without
    /// reusing a already-fired one.
    async fn start(&self, bus: Arc<MessageBus>) -> Result<(), ChannelError>;

    /// Signal the running task (if any) to shut down and wait for it to
    /// acknowledge. A no-op if the channel was never started.
    async fn stop(&self) -> Result<(), ChannelError>;

    /// Deliver a single outbound envelope to the external service.
    async fn send(&self, envelope: &OutboundEnvelope) -> Result<(), ChannelError>;

    /// Deliver a streamed reply to `chat_id`. The default concatenates every
    /// chunk's content and sends it as one [`OutboundEnvelope`]; transports
    /// capable of progressive edits (e.g. editing a single message in place)
    /// override this to stream instead of buffering.
    async fn send_stream(
        &self,
        account_id: &str,
        chat_id: &str,
        chunks: Vec<StreamChunk>,
    ) -> Result<(), ChannelError> {
        let content: String = chunks.into_iter().map(|c| c.content).collect();
        let envelope = OutboundEnvelope::new(self.name(), account_id, chat_id, content);
        self.send(&envelope).await
    }

    fn status(&self) -> ChannelStatus;

    /// Whether `sender_id` is allowed to interact with this channel/account.
    fn is_allowed(&self, sender_id: &str) -> bool;
}

/// Shared lifecycle plumbing every adapter composes rather than inherits:
/// current status cell, a restartable stop signal, and the enabled flag +
/// allowlist a channel descriptor carries.
///
/// `start` creates a fresh `watch` channel each time so a channel stopped
/// and started again doesn't observe a stale "stop" state from its
/// previous run.
pub struct BaseRuntime {
    status: Mutex<ChannelStatus>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    allowlist: AllowList,
    enabled: AtomicBool,
}

impl BaseRuntime {
    /// `enabled` mirrors the channel's config-level `enabled` flag
    /// (`spec.md`'s `ChannelDescriptor.enabled`); adapters are only ever
    /// constructed for a channel/account already marked enabled in config,
    /// so this defaults to `true`. `set_enabled` lets a future config
    /// reload flip it without tearing the adapter down.
    pub fn new(allowlist: AllowList) -> Self {
        Self {
            status: Mutex::new(ChannelStatus::Created),
            stop_tx: Mutex::new(None),
            allowlist,
            enabled: AtomicBool::new(true),
        }
    }

    pub fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }

    pub fn set_status(&self, status: ChannelStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// True iff the channel is enabled and currently running, and either
    /// the allowlist is empty (permissive) or `sender_id` is listed. A
    /// channel that is disabled, not yet started, or stopped is never
    /// "allowed" regardless of allowlist contents.
    pub fn is_allowed(&self, sender_id: &str) -> bool {
        self.is_enabled()
            && matches!(self.status(), ChannelStatus::Running)
            && self.allowlist.is_allowed(sender_id)
    }

    /// Create a fresh stop signal for a new run, discarding any previous one.
    /// Returns the receiver the run loop should select on.
    pub fn begin_run(&self) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        *self.stop_tx.lock().unwrap() = Some(tx);
        self.set_status(ChannelStatus::Running);
        rx
    }

    /// Fire the current run's stop signal, if one exists.
    pub fn request_stop(&self) {
        if let Some(tx) = self.stop_tx.lock().unwrap().as_ref() {
            let _ = tx.send(true);
        }
        self.set_status(ChannelStatus::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingChannel {
        runtime: BaseRuntime,
        sent: StdMutex<Vec<OutboundEnvelope>>,
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &str {
            "recording"
        }

        fn account_id(&self) -> &str {
            "default"
        }

        async fn start(&self, _bus: Arc<MessageBus>) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn stop(&self) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn send(&self, envelope: &OutboundEnvelope) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push(envelope.clone());
            Ok(())
        }

        fn status(&self) -> ChannelStatus {
            self.runtime.status()
        }

        fn is_allowed(&self, sender_id: &str) -> bool {
            self.runtime.is_allowed(sender_id)
        }
    }

    #[tokio::test]
    async fn default_send_stream_concatenates_chunks_into_one_send() {
        let channel = RecordingChannel {
            runtime: BaseRuntime::new(AllowList::default()),
            sent: StdMutex::new(Vec::new()),
        };
        let chunks = vec![
            StreamChunk { content: "Hel".into(), is_thinking: false, is_final: false, is_complete: false, error: None },
            StreamChunk { content: "lo".into(), is_thinking: false, is_final: true, is_complete: true, error: None },
        ];
        channel.send_stream("acct", "chat1", chunks).await.unwrap();

        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content, "Hello");
        assert_eq!(sent[0].chat_id, "chat1");
    }

    #[tokio::test]
    async fn restart_creates_a_fresh_stop_signal() {
        let runtime = BaseRuntime::new(AllowList::default());
        let mut rx1 = runtime.begin_run();
        runtime.request_stop();
        assert!(*rx1.borrow_and_update());

        // A second run must not observe the first run's fired signal.
        let mut rx2 = runtime.begin_run();
        assert!(!*rx2.borrow_and_update());
        assert_eq!(runtime.status(), ChannelStatus::Running);
    }

    #[test]
    fn allowlist_is_delegated_once_running() {
        let runtime = BaseRuntime::new(AllowList::new(vec!["u1".into()]));
        runtime.begin_run();
        assert!(runtime.is_allowed("u1"));
        assert!(!runtime.is_allowed("u2"));
    }

    #[test]
    fn not_yet_started_channel_is_never_allowed() {
        let runtime = BaseRuntime::new(AllowList::default());
        assert_eq!(runtime.status(), ChannelStatus::Created);
        assert!(!runtime.is_allowed("anyone"));
    }

    #[test]
    fn stopped_channel_is_never_allowed() {
        let runtime = BaseRuntime::new(AllowList::default());
        runtime.begin_run();
        assert!(runtime.is_allowed("anyone"));
        runtime.request_stop();
        assert!(!runtime.is_allowed("anyone"));
    }

    #[test]
    fn disabled_channel_is_never_allowed_even_while_running() {
        let runtime = BaseRuntime::new(AllowList::default());
        runtime.begin_run();
        runtime.set_enabled(false);
        assert!(!runtime.is_allowed("anyone"));
        runtime.set_enabled(true);
        assert!(runtime.is_allowed("anyone"));
    }
}
