//! Error types for the chat core.

use thiserror::Error;

use crate::chat::types::ConversationId;

/// Errors raised by a durable slot backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The backend refused the write because it would exceed its quota.
    #[error("storage quota exceeded: {needed} bytes needed, {quota} allowed")]
    QuotaExceeded {
        /// Bytes the slot set would occupy after the write.
        needed: usize,
        /// Configured quota in bytes.
        quota: usize,
    },
}

/// Result alias for slot backend operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Chat core error type.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The referenced conversation does not exist.
    #[error("conversation not found: {0}")]
    NotFound(ConversationId),
    /// The repository has not been initialized yet.
    #[error("conversation repository is not initialized")]
    NotInitialized,
    /// A durable write failed; in-memory state is kept.
    #[error("persistence failure: {0}")]
    PersistenceFailure(#[from] StoreError),
    /// Send was called with blank text.
    #[error("message is empty")]
    EmptyInput,
    /// Network or connection failure while reaching the reply endpoint.
    #[error("Network error: {0}")]
    Transport(String),
    /// The reply endpoint answered with a non-success status.
    #[error("Server error: {0}")]
    Server(u16),
    /// The reply endpoint answered with a body that is not JSON.
    #[error("Malformed reply: {0}")]
    MalformedReply(String),
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ChatError {
    /// Stable tag for the error kind, stored as message metadata.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::NotInitialized => "not_initialized",
            Self::PersistenceFailure(_) => "persistence_failure",
            Self::EmptyInput => "empty_input",
            Self::Transport(_) => "transport_error",
            Self::Server(_) => "server_error",
            Self::MalformedReply(_) => "malformed_reply",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }

    /// Whether this error came out of a reply exchange.
    #[must_use]
    pub const fn is_exchange_failure(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Server(_) | Self::MalformedReply(_)
        )
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Convenience result alias for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;
