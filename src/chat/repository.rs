//! In-memory conversation collection with durable write-through.
//!
//! Once [`ConversationRepository::initialize`] has run, the collection is
//! never empty and the active id always names one of its members. Every
//! mutation saves the whole collection before returning; a failed save is
//! handed back in the [`Committed`] result and the in-memory change stands.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::chat::errors::{ChatError, ChatResult, StoreError};
use crate::chat::store::PersistentStore;
use crate::chat::types::{Conversation, ConversationId, ConversationSummary, Message};

/// Repository shared between the exchange and the controller.
pub type SharedRepository = Arc<Mutex<ConversationRepository>>;

/// Result of a mutation together with the outcome of its durable write.
#[derive(Debug)]
#[must_use]
pub struct Committed<T> {
    /// Value produced by the mutation.
    pub value: T,
    /// Save failure, if the durable write did not go through.
    pub save_error: Option<StoreError>,
}

impl<T> Committed<T> {
    /// Whether the mutation reached durable storage.
    pub const fn is_durable(&self) -> bool {
        self.save_error.is_none()
    }

    /// Drop the persistence outcome and keep the value.
    pub fn into_value(self) -> T {
        self.value
    }
}

/// Ordered conversation collection, most recently created first.
pub struct ConversationRepository {
    store: PersistentStore,
    conversations: Vec<Conversation>,
    active_id: Option<ConversationId>,
}

impl ConversationRepository {
    /// Create an uninitialized repository over `store`.
    #[must_use]
    pub const fn new(store: PersistentStore) -> Self {
        Self {
            store,
            conversations: Vec::new(),
            active_id: None,
        }
    }

    /// Wrap the repository for sharing.
    #[must_use]
    pub fn into_shared(self) -> SharedRepository {
        Arc::new(Mutex::new(self))
    }

    /// Load saved conversations, or seed one on first run.
    pub async fn initialize(&mut self) -> Committed<()> {
        if let Some(loaded) = self.store.load().await {
            let remembered = self
                .store
                .load_active()
                .await
                .filter(|id| loaded.iter().any(|c| c.id() == id));
            self.active_id = remembered.or_else(|| loaded.first().map(|c| c.id().clone()));
            self.conversations = loaded;
            info!(
                count = self.conversations.len(),
                "loaded saved conversations"
            );
            return Committed {
                value: (),
                save_error: None,
            };
        }

        let seed = Conversation::seed();
        info!(id = %seed.id(), "no saved conversations, seeding");
        self.active_id = Some(seed.id().clone());
        self.conversations = vec![seed];
        Committed {
            value: (),
            save_error: self.persist().await,
        }
    }

    /// Prepend a new empty conversation and make it active.
    pub async fn create(&mut self, title: &str) -> Committed<ConversationId> {
        let conversation = Conversation::new(title);
        let id = conversation.id().clone();
        self.conversations.insert(0, conversation);
        self.active_id = Some(id.clone());
        debug!(%id, "created conversation");
        Committed {
            value: id,
            save_error: self.persist().await,
        }
    }

    /// Remove a conversation; returns the id that is active afterwards.
    ///
    /// Removing the last conversation seeds a fresh one in its place.
    ///
    /// # Errors
    /// Returns `NotFound` if no conversation has this id.
    pub async fn delete(&mut self, id: &ConversationId) -> ChatResult<Committed<ConversationId>> {
        let index = self
            .position(id)
            .ok_or_else(|| ChatError::NotFound(id.clone()))?;
        self.conversations.remove(index);

        if self.conversations.is_empty() {
            self.conversations.push(Conversation::seed());
        }
        let active_removed = self.active_id.as_ref() == Some(id);
        if active_removed || self.active_id.is_none() {
            self.active_id = self.conversations.first().map(|c| c.id().clone());
        }

        let active = self
            .active_id
            .clone()
            .ok_or(ChatError::NotInitialized)?;
        debug!(%id, %active, "deleted conversation");
        Ok(Committed {
            value: active,
            save_error: self.persist().await,
        })
    }

    /// Make `id` the active conversation.
    ///
    /// # Errors
    /// Returns `NotFound` if no conversation has this id; state is unchanged.
    pub async fn select(&mut self, id: &ConversationId) -> ChatResult<Committed<()>> {
        if self.position(id).is_none() {
            return Err(ChatError::NotFound(id.clone()));
        }
        self.active_id = Some(id.clone());
        Ok(Committed {
            value: (),
            save_error: self.persist().await,
        })
    }

    /// Discard every conversation and start over with a single seed.
    pub async fn reset(&mut self) -> Committed<ConversationId> {
        let seed = Conversation::seed();
        let id = seed.id().clone();
        info!(discarded = self.conversations.len(), "clearing all conversations");
        self.conversations = vec![seed];
        self.active_id = Some(id.clone());
        Committed {
            value: id,
            save_error: self.persist().await,
        }
    }

    /// Append a message to the conversation `id`.
    ///
    /// Returns `None` when that conversation no longer exists; the message
    /// is dropped and nothing is persisted.
    pub async fn append(
        &mut self,
        id: &ConversationId,
        message: Message,
    ) -> Option<Committed<usize>> {
        let index = self.position(id)?;
        let conversation = &mut self.conversations[index];
        conversation.push_message(message);
        let count = conversation.messages().len();
        Some(Committed {
            value: count,
            save_error: self.persist().await,
        })
    }

    /// The active conversation.
    ///
    /// # Errors
    /// Returns `NotInitialized` before [`Self::initialize`] has run.
    pub fn active(&self) -> ChatResult<&Conversation> {
        self.active_id
            .as_ref()
            .and_then(|id| self.get(id))
            .ok_or(ChatError::NotInitialized)
    }

    /// Identifier of the active conversation.
    #[must_use]
    pub const fn active_id(&self) -> Option<&ConversationId> {
        self.active_id.as_ref()
    }

    /// Look up a conversation by id.
    #[must_use]
    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id() == id)
    }

    /// All conversations, most recently created first.
    #[must_use]
    pub fn list(&self) -> &[Conversation] {
        &self.conversations
    }

    /// Sidebar entries in listing order.
    #[must_use]
    pub fn summaries(&self) -> Vec<ConversationSummary> {
        self.conversations.iter().map(Conversation::summary).collect()
    }

    /// Number of conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// Whether the repository holds no conversations (only before initialization).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Underlying persistent store.
    #[must_use]
    pub const fn store(&self) -> &PersistentStore {
        &self.store
    }

    fn position(&self, id: &ConversationId) -> Option<usize> {
        self.conversations.iter().position(|c| c.id() == id)
    }

    async fn persist(&self) -> Option<StoreError> {
        let mut result = self.store.save(&self.conversations).await;
        if result.is_ok() {
            if let Some(active) = &self.active_id {
                result = self.store.save_active(active).await;
            }
        }
        match result {
            Ok(()) => None,
            Err(err) => {
                warn!(error = %err, "failed to persist conversations");
                Some(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::store::{MemorySlots, SlotKeys};

    fn store_over(backend: Arc<MemorySlots>) -> PersistentStore {
        PersistentStore::new(backend, SlotKeys::default())
    }

    async fn initialized() -> ConversationRepository {
        let mut repo = ConversationRepository::new(store_over(Arc::new(MemorySlots::new())));
        repo.initialize().await.into_value();
        repo
    }

    fn assert_invariant(repo: &ConversationRepository) {
        assert!(!repo.is_empty());
        let active = repo.active().unwrap();
        assert!(repo.list().iter().any(|c| c.id() == active.id()));
    }

    #[tokio::test]
    async fn test_first_run_seeds_and_persists() {
        let backend = Arc::new(MemorySlots::new());
        let mut repo = ConversationRepository::new(store_over(backend.clone()));
        assert!(repo.active().is_err());

        let committed = repo.initialize().await;

        assert!(committed.is_durable());
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.active().unwrap().title(), "New Conversation");
        assert_invariant(&repo);
        assert_eq!(store_over(backend).load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_initialize_restores_saved_state_and_active_id() {
        let backend = Arc::new(MemorySlots::new());
        let mut first = ConversationRepository::new(store_over(backend.clone()));
        first.initialize().await.into_value();
        let older = first.active_id().unwrap().clone();
        first.create("Conversation 2").await.into_value();
        first.select(&older).await.unwrap().into_value();

        let mut second = ConversationRepository::new(store_over(backend));
        second.initialize().await.into_value();

        assert_eq!(second.len(), 2);
        assert_eq!(second.active_id(), Some(&older));
    }

    #[tokio::test]
    async fn test_initialize_falls_back_to_first_when_active_is_stale() {
        let backend = Arc::new(MemorySlots::new());
        let store = store_over(backend.clone());
        let conversations = vec![Conversation::new("a"), Conversation::new("b")];
        store.save(&conversations).await.unwrap();
        store.save_active(&ConversationId::from("gone")).await.unwrap();

        let mut repo = ConversationRepository::new(store);
        repo.initialize().await.into_value();

        assert_eq!(repo.active_id(), Some(conversations[0].id()));
    }

    #[tokio::test]
    async fn test_create_prepends_and_activates() {
        let mut repo = initialized().await;
        repo.create("second").await.into_value();
        assert_eq!(repo.len(), 2);

        let id = repo.create("x").await.into_value();

        assert_eq!(repo.len(), 3);
        assert_eq!(repo.list()[0].id(), &id);
        assert_eq!(repo.list()[0].title(), "x");
        assert_eq!(repo.active_id(), Some(&id));
        assert_invariant(&repo);
    }

    #[tokio::test]
    async fn test_delete_only_conversation_reseeds() {
        let mut repo = initialized().await;
        let only = repo.active_id().unwrap().clone();

        let active = repo.delete(&only).await.unwrap().into_value();

        assert_eq!(repo.len(), 1);
        assert_ne!(active, only);
        assert_eq!(repo.active_id(), Some(&active));
        assert!(repo.active().unwrap().messages().is_empty());
    }

    #[tokio::test]
    async fn test_delete_active_moves_to_first_remaining() {
        let mut repo = initialized().await;
        let oldest = repo.active_id().unwrap().clone();
        let middle = repo.create("middle").await.into_value();
        let newest = repo.create("newest").await.into_value();

        let active = repo.delete(&newest).await.unwrap().into_value();

        assert_eq!(active, middle);
        assert_eq!(repo.len(), 2);
        assert!(repo.get(&oldest).is_some());
        assert_invariant(&repo);
    }

    #[tokio::test]
    async fn test_delete_inactive_keeps_active() {
        let mut repo = initialized().await;
        let oldest = repo.active_id().unwrap().clone();
        let newest = repo.create("newest").await.into_value();

        repo.delete(&oldest).await.unwrap().into_value();

        assert_eq!(repo.active_id(), Some(&newest));
    }

    #[tokio::test]
    async fn test_delete_and_select_unknown_id_are_not_found() {
        let mut repo = initialized().await;
        let before = repo.list().to_vec();
        let missing = ConversationId::from("missing");

        assert!(matches!(repo.delete(&missing).await, Err(ChatError::NotFound(_))));
        assert!(matches!(repo.select(&missing).await, Err(ChatError::NotFound(_))));
        assert_eq!(repo.list(), before.as_slice());
    }

    #[tokio::test]
    async fn test_select_is_idempotent() {
        let mut repo = initialized().await;
        let target = repo.active_id().unwrap().clone();
        repo.create("other").await.into_value();

        repo.select(&target).await.unwrap().into_value();
        let after_first = (repo.list().to_vec(), repo.active_id().cloned());
        repo.select(&target).await.unwrap().into_value();

        assert_eq!((repo.list().to_vec(), repo.active_id().cloned()), after_first);
    }

    #[tokio::test]
    async fn test_append_to_deleted_conversation_is_dropped() {
        let mut repo = initialized().await;
        let doomed = repo.create("doomed").await.into_value();
        repo.delete(&doomed).await.unwrap().into_value();

        let appended = repo.append(&doomed, Message::assistant("late")).await;

        assert!(appended.is_none());
        assert!(repo.get(&doomed).is_none());
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_reset_leaves_single_empty_active() {
        let mut repo = initialized().await;
        for i in 0..4 {
            repo.create(&format!("c{i}")).await.into_value();
        }
        assert_eq!(repo.len(), 5);

        let id = repo.reset().await.into_value();

        assert_eq!(repo.len(), 1);
        assert_eq!(repo.active_id(), Some(&id));
        assert!(repo.active().unwrap().messages().is_empty());
    }

    #[tokio::test]
    async fn test_save_failure_keeps_in_memory_mutation() {
        let mut repo = ConversationRepository::new(store_over(Arc::new(MemorySlots::with_quota(600))));
        repo.initialize().await.into_value();

        let mut last = None;
        for i in 0..10 {
            last = Some(repo.create(&format!("Conversation {i}")).await);
        }
        let last = last.unwrap();

        assert!(!last.is_durable());
        assert!(matches!(last.save_error, Some(StoreError::QuotaExceeded { .. })));
        assert_eq!(repo.len(), 11);
        assert_eq!(repo.active_id(), Some(&last.value));
    }
}
