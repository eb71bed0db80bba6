//! Durable key-value slots and the conversation store built on them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;
use tracing::{debug, warn};

use crate::chat::config::StorageConfig;
use crate::chat::errors::{StoreError, StoreResult};
use crate::chat::types::{Conversation, ConversationId, Theme, now_ms};

/// Boxed future type for slot operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A durable string-keyed slot storage.
pub trait SlotBackend: Send + Sync {
    /// Read the value stored under `key`, if any.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn read(&self, key: &str) -> StoreFuture<'_, StoreResult<Option<String>>>;

    /// Replace the value stored under `key`.
    ///
    /// # Errors
    /// Returns an error if storage access fails or the write is refused.
    fn write(&self, key: &str, value: String) -> StoreFuture<'_, StoreResult<()>>;
}

/// `SQLite` implementation of slot storage.
pub struct SqliteSlots {
    conn: Arc<Connection>,
    table: String,
}

impl SqliteSlots {
    /// Table name for slots.
    pub const DEFAULT_TABLE: &'static str = "slots";

    /// Initialize the store and create the table if it doesn't exist.
    ///
    /// # Errors
    /// Returns an error if database operations fail.
    pub async fn new(conn: Arc<Connection>, table: &str) -> StoreResult<Self> {
        let table = table.to_string();
        let table_name = table.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                );"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, table })
    }

    /// Open the database file named in `config`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn open(config: &StorageConfig) -> StoreResult<Self> {
        let conn = Connection::open(&config.sqlite_path).await?;
        debug!(path = %config.sqlite_path.display(), "opened slot database");
        Self::new(Arc::new(conn), &config.slot_table).await
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns an error if the database cannot be created.
    pub async fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::new(Arc::new(conn), Self::DEFAULT_TABLE).await
    }
}

impl SlotBackend for SqliteSlots {
    fn read(&self, key: &str) -> StoreFuture<'_, StoreResult<Option<String>>> {
        let key = key.to_string();
        Box::pin(async move {
            let table = self.table.clone();
            let value = self
                .conn
                .call(move |conn| {
                    let value = conn
                        .query_row(
                            &format!("SELECT value FROM {table} WHERE key = ?1"),
                            rusqlite::params![key],
                            |row| row.get::<_, String>(0),
                        )
                        .optional()?;
                    Ok(value)
                })
                .await?;
            Ok(value)
        })
    }

    fn write(&self, key: &str, value: String) -> StoreFuture<'_, StoreResult<()>> {
        let key = key.to_string();
        Box::pin(async move {
            let table = self.table.clone();
            let updated_at = now_ms();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT INTO {table} (key, value, updated_at)
                             VALUES (?1, ?2, ?3)
                             ON CONFLICT(key) DO UPDATE
                             SET value = excluded.value, updated_at = excluded.updated_at"
                        ),
                        rusqlite::params![key, value, updated_at],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }
}

/// In-process slot storage with an optional byte quota.
///
/// Mirrors browser storage: a write that would push the total size of keys
/// and values past the quota is refused and the previous value is kept.
#[derive(Default)]
pub struct MemorySlots {
    slots: DashMap<String, String>,
    quota_bytes: Option<usize>,
}

impl MemorySlots {
    /// Create an unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that refuses writes beyond `quota_bytes`.
    #[must_use]
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            slots: DashMap::new(),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn used_bytes_except(&self, key: &str) -> usize {
        self.slots
            .iter()
            .filter(|entry| entry.key() != key)
            .map(|entry| entry.key().len() + entry.value().len())
            .sum()
    }
}

impl SlotBackend for MemorySlots {
    fn read(&self, key: &str) -> StoreFuture<'_, StoreResult<Option<String>>> {
        let value = self.slots.get(key).map(|entry| entry.value().clone());
        Box::pin(async move { Ok(value) })
    }

    fn write(&self, key: &str, value: String) -> StoreFuture<'_, StoreResult<()>> {
        let result = match self.quota_bytes {
            Some(quota) => {
                let needed = self.used_bytes_except(key) + key.len() + value.len();
                if needed > quota {
                    Err(StoreError::QuotaExceeded { needed, quota })
                } else {
                    self.slots.insert(key.to_string(), value);
                    Ok(())
                }
            }
            None => {
                self.slots.insert(key.to_string(), value);
                Ok(())
            }
        };
        Box::pin(async move { result })
    }
}

/// Slot keys used by one client namespace.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SlotKeys {
    /// Key holding the serialized conversation sequence.
    pub conversations: String,
    /// Key holding the last active conversation id.
    pub active: String,
    /// Key holding the theme preference.
    pub theme: String,
}

impl SlotKeys {
    /// Derive the keys for a namespace.
    #[must_use]
    pub fn for_namespace(namespace: &str) -> Self {
        Self {
            conversations: format!("{namespace}_conversations_v1"),
            active: format!("{namespace}_active_v1"),
            theme: format!("{namespace}_theme_v1"),
        }
    }
}

impl Default for SlotKeys {
    fn default() -> Self {
        Self::for_namespace(crate::chat::config::DEFAULT_NAMESPACE)
    }
}

/// Serializes the conversation collection to its durable slot.
#[derive(Clone)]
pub struct PersistentStore {
    backend: Arc<dyn SlotBackend>,
    keys: SlotKeys,
}

impl PersistentStore {
    /// Create a store over `backend` using `keys`.
    #[must_use]
    pub fn new(backend: Arc<dyn SlotBackend>, keys: SlotKeys) -> Self {
        Self { backend, keys }
    }

    /// Keys this store reads and writes.
    #[must_use]
    pub const fn keys(&self) -> &SlotKeys {
        &self.keys
    }

    /// Load the saved conversations.
    ///
    /// Returns `None` when nothing usable is stored: an empty slot, a
    /// read failure, unparsable contents, or an empty sequence.
    pub async fn load(&self) -> Option<Vec<Conversation>> {
        let raw = self.read_slot(&self.keys.conversations).await?;
        match serde_json::from_str::<Vec<Conversation>>(&raw) {
            Ok(conversations) if conversations.is_empty() => None,
            Ok(conversations) => Some(conversations),
            Err(err) => {
                warn!(error = %err, "stored conversations are unreadable, starting fresh");
                None
            }
        }
    }

    /// Save the full conversation sequence.
    ///
    /// # Errors
    /// Returns an error if serialization or the backend write fails.
    pub async fn save(&self, conversations: &[Conversation]) -> StoreResult<()> {
        let raw = serde_json::to_string(conversations)?;
        self.backend.write(&self.keys.conversations, raw).await
    }

    /// Load the last recorded active conversation id.
    pub async fn load_active(&self) -> Option<ConversationId> {
        self.read_slot(&self.keys.active)
            .await
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map(ConversationId::from)
    }

    /// Record the active conversation id.
    ///
    /// # Errors
    /// Returns an error if the backend write fails.
    pub async fn save_active(&self, id: &ConversationId) -> StoreResult<()> {
        self.backend
            .write(&self.keys.active, id.as_str().to_string())
            .await
    }

    /// Load the theme preference; unknown values read as the default.
    pub async fn load_theme(&self) -> Theme {
        self.read_slot(&self.keys.theme)
            .await
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default()
    }

    /// Save the theme preference.
    ///
    /// # Errors
    /// Returns an error if the backend write fails.
    pub async fn save_theme(&self, theme: Theme) -> StoreResult<()> {
        self.backend
            .write(&self.keys.theme, theme.as_str().to_string())
            .await
    }

    async fn read_slot(&self, key: &str) -> Option<String> {
        match self.backend.read(key).await {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, key, "slot read failed");
                None
            }
        }
    }
}
