//! Configuration for the chat client.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::chat::errors::{ChatError, ChatResult};

/// Default storage namespace; slot keys are derived from it.
pub const DEFAULT_NAMESPACE: &str = "aurora";

/// Default reply endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:3000/api/chat";

/// Top-level configuration for a chat session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatConfig {
    /// URL of the remote reply endpoint.
    pub endpoint_url: String,
    /// Namespace prefix for the durable slots.
    pub namespace: String,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Request timeout, including reading the reply.
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
    /// Connection timeout.
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_ENDPOINT.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            storage: StorageConfig::default(),
            request_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl ChatConfig {
    /// Create a new config with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a config from process environment variables.
    ///
    /// Recognized: `AURORA_ENDPOINT`, `AURORA_NAMESPACE`, `AURORA_DB`,
    /// `AURORA_TIMEOUT_SECS`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(url) = lookup("AURORA_ENDPOINT") {
            config.endpoint_url = url;
        }
        if let Some(namespace) = lookup("AURORA_NAMESPACE") {
            config.namespace = namespace;
        }
        if let Some(path) = lookup("AURORA_DB") {
            config.storage.sqlite_path = PathBuf::from(path);
        }
        if let Some(secs) = lookup("AURORA_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.request_timeout = Duration::from_secs(secs);
        }
        config
    }

    /// Set the reply endpoint URL.
    #[must_use]
    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = url.into();
        self
    }

    /// Set the storage namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ChatResult<()> {
        let url = Url::parse(&self.endpoint_url)
            .map_err(|err| ChatError::InvalidConfig(format!("endpoint_url: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ChatError::InvalidConfig(format!(
                "endpoint_url must be http or https, got {}",
                url.scheme()
            )));
        }

        if self.namespace.trim().is_empty() {
            return Err(ChatError::InvalidConfig(
                "namespace must not be empty".to_string(),
            ));
        }

        if self.storage.slot_table.is_empty()
            || !self
                .storage
                .slot_table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ChatError::InvalidConfig(format!(
                "slot_table must be a plain identifier, got {:?}",
                self.storage.slot_table
            )));
        }

        if self.request_timeout.is_zero() {
            return Err(ChatError::InvalidConfig(
                "request_timeout must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Storage settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
    /// Table holding the key-value slots.
    pub slot_table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("aurora.sqlite"),
            slot_table: "slots".to_string(),
        }
    }
}

/// Serde module for Duration serialization.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
