use thiserror::Error;

/// Core error taxonomy shared across the orchestrator.
///
/// Variants are grouped by the classes described in the error-handling
/// design: validation, transport/transient, security, business, fatal.
#[derive(Debug, Error)]
pub enum SkynetError {
    // -- validation --------------------------------------------------------
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // -- transport / transient ----------------------------------------------
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timeout after {ms}ms")]
    Timeout { ms: u64 },

    // -- security ------------------------------------------------------------
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),

    // -- business --------------------------------------------------------------
    #[error("channel not found: {channel}")]
    ChannelNotFound { channel: String },

    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },

    // -- fatal --------------------------------------------------------------------
    #[error("bus closed")]
    BusClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SkynetError {
    /// Short error code string surfaced to callers (JSON-RPC errors, webhook
    /// HTTP bodies, logs).
    pub fn code(&self) -> &'static str {
        match self {
            SkynetError::Config(_) => "CONFIG_ERROR",
            SkynetError::InvalidRequest(_) => "INVALID_REQUEST",
            SkynetError::Transport(_) => "TRANSPORT_ERROR",
            SkynetError::Timeout { .. } => "TIMEOUT",
            SkynetError::AuthFailed(_) => "AUTH_FAILED",
            SkynetError::SignatureInvalid(_) => "SIGNATURE_INVALID",
            SkynetError::ChannelNotFound { .. } => "CHANNEL_NOT_FOUND",
            SkynetError::PermissionDenied { .. } => "PERMISSION_DENIED",
            SkynetError::BusClosed => "BUS_CLOSED",
            SkynetError::Io(_) => "IO_ERROR",
            SkynetError::Serialization(_) => "SERIALIZATION_ERROR",
            SkynetError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SkynetError>;
