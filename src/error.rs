//! RelayGate error types

use thiserror::Error;

/// RelayGate error type
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid access credential
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// No session record or connection exists for the agent
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// A connection exists but is not authenticated
    #[error("Session not ready: {0}")]
    SessionNotReady(String),

    /// Admission queue for the agent is full
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Waited too long for a rate-limiter token
    #[error("Admission timed out: {0}")]
    AdmissionTimeout(String),

    /// No pairing code arrived in time
    #[error("Pairing timed out: {0}")]
    PairingTimeout(String),

    /// The agent is already paired and logged in
    #[error("Already paired: {0}")]
    PairingAlreadyExists(String),

    /// The AI backend did not answer in time
    #[error("AI backend timeout: {0}")]
    UpstreamTimeout(String),

    /// The AI backend answered with an error or an unusable body
    #[error("AI backend error: {0}")]
    UpstreamError(String),

    /// Media payload exceeds the configured limit
    #[error("Media too large: {size} bytes exceeds limit of {limit} bytes")]
    MediaTooLarge { size: usize, limit: usize },

    /// Every configured webhook destination failed
    #[error("All {attempted} webhook deliveries failed: {last_error}")]
    AllWebhooksFailed { attempted: usize, last_error: String },

    /// A single webhook delivery failed
    #[error("Webhook error: {0}")]
    Webhook(String),

    /// Request failed validation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Protocol client error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Persistence error
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Gateway lifecycle error
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Stable machine-readable code for API surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Unauthorized(_) => "UNAUTHORIZED",
            Error::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Error::SessionNotReady(_) => "SESSION_NOT_READY",
            Error::RateLimited(_) => "RATE_LIMITED",
            Error::AdmissionTimeout(_) => "ADMISSION_TIMEOUT",
            Error::PairingTimeout(_) => "PAIRING_TIMEOUT",
            Error::PairingAlreadyExists(_) => "ALREADY_LOGGED_IN",
            Error::UpstreamTimeout(_) => "AI_TIMEOUT",
            Error::UpstreamError(_) => "AI_DOWNSTREAM_ERROR",
            Error::MediaTooLarge { .. } => "MEDIA_TOO_LARGE",
            Error::AllWebhooksFailed { .. } => "WEBHOOK_DELIVERY_FAILED",
            Error::Webhook(_) => "WEBHOOK_ERROR",
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            Error::Protocol(_) => "PROTOCOL_ERROR",
            Error::Store(_) => "STORE_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Gateway(_) => "GATEWAY_ERROR",
            Error::Io(_) | Error::Serialization(_) | Error::Http(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the error was caused by the caller rather than the gateway.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Unauthorized(_)
                | Error::SessionNotFound(_)
                | Error::SessionNotReady(_)
                | Error::RateLimited(_)
                | Error::PairingAlreadyExists(_)
                | Error::MediaTooLarge { .. }
                | Error::InvalidRequest(_)
        )
    }
}

/// Result type alias for RelayGate operations
pub type Result<T> = std::result::Result<T, Error>;
