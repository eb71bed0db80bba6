//! Conversation store and message exchange for the chat client.
//!
//! Organized leaves first:
//! - `types`: conversation, message and theme records
//! - `errors`: store and chat error types
//! - `config`: client configuration
//! - `store`: durable slot backends and the persistent store
//! - `repository`: the in-memory conversation collection
//! - `exchange`: the send/receive cycle against the reply endpoint
//! - `session`: the controller the UI layer drives

pub mod config;
pub mod errors;
pub mod exchange;
pub mod repository;
pub mod session;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::{ChatConfig, StorageConfig};
pub use errors::{ChatError, ChatResult, StoreError, StoreResult};
pub use exchange::{
    HttpReplyEndpoint, MessageExchange, PendingExchange, ReplyEndpoint, ReplyStatus, Resolution,
};
pub use repository::{Committed, ConversationRepository, SharedRepository};
pub use session::{Notification, Presenter, SessionController, SessionSnapshot};
pub use store::{MemorySlots, PersistentStore, SlotBackend, SlotKeys, SqliteSlots};
pub use types::{Conversation, ConversationId, ConversationSummary, Message, Role, Theme};
