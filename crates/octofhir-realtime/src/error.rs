//! Realtime error types.
//!
//! Only configuration and construction errors ever reach callers directly.
//! Transport, protocol and auth failures are absorbed by the connection task
//! and surfaced as [`ConnectionStatus`](crate::state::ConnectionStatus)
//! notifications.

use thiserror::Error;

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Errors produced by the realtime synchronization layer.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connect or send failure. Transient; drives backoff.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed inbound frame. Logged and dropped.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Credential rejected or token provider failure.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Maximum reconnect attempts reached.
    #[error("Reconnect attempts exhausted after {attempts} attempts")]
    CapacityExceeded { attempts: u32 },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No Tokio runtime to spawn the connection task on.
    #[error("Tokio runtime unavailable: {0}")]
    Runtime(String),
}

impl RealtimeError {
    /// Whether the condition is recovered from internally.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Protocol(_))
    }

    /// Get error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Protocol(_) => "protocol",
            Self::Auth(_) => "auth",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::Config(_) => "configuration",
            Self::Runtime(_) => "runtime",
        }
    }
}

/// Physical connection errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {endpoint} failed: {message}")]
    Connect { endpoint: String, message: String },

    #[error("connect to {endpoint} timed out after {timeout_ms}ms")]
    ConnectTimeout { endpoint: String, timeout_ms: u64 },

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),
}

impl TransportError {
    pub fn connect(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connect {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    pub fn send(message: impl Into<String>) -> Self {
        Self::Send(message.into())
    }

    pub fn receive(message: impl Into<String>) -> Self {
        Self::Receive(message.into())
    }
}

/// Inbound frame decoding errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("frame has no `type` field")]
    MissingType,

    #[error("unknown frame type `{0}`")]
    UnknownType(String),

    #[error("`{kind}` frame is missing field `{field}`")]
    MissingField { kind: &'static str, field: &'static str },

    #[error("invalid `{kind}` payload: {message}")]
    InvalidPayload { kind: &'static str, message: String },
}

impl ProtocolError {
    pub fn missing_field(kind: &'static str, field: &'static str) -> Self {
        Self::MissingField { kind, field }
    }

    pub fn invalid_payload(kind: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            kind,
            message: message.into(),
        }
    }
}

/// Credential errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("server rejected credentials: {code}")]
    Rejected { code: String },

    #[error("token provider failed: {0}")]
    Provider(String),

    #[error("auth retries exhausted after {failures} failures")]
    RetriesExhausted { failures: u32 },
}

impl AuthError {
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider(message.into())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl ConfigError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
