use thiserror::Error;

/// Errors that can occur within any channel adapter.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("sender not in allowlist: {sender_id}")]
    NotAllowed { sender_id: String },

    #[error("channel not found: {channel}")]
    NotFound { channel: String },

    #[error("bus error: {0}")]
    Bus(#[from] skynet_bus::BusError),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
