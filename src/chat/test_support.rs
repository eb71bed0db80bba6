//! Scripted collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::chat::errors::{ChatError, ChatResult};
use crate::chat::exchange::{ReplyEndpoint, ReplyFuture};
use crate::chat::repository::{ConversationRepository, SharedRepository};
use crate::chat::store::{MemorySlots, PersistentStore, SlotKeys};

/// Initialized repository over fresh in-memory slots.
pub async fn shared_repository() -> SharedRepository {
    let store = PersistentStore::new(Arc::new(MemorySlots::new()), SlotKeys::default());
    let mut repo = ConversationRepository::new(store);
    repo.initialize().await.into_value();
    repo.into_shared()
}

/// Endpoint that answers from a queue, optionally holding each answer until
/// a gate is notified.
pub struct ScriptedEndpoint {
    replies: Mutex<VecDeque<ChatResult<Option<String>>>>,
    prompts: Mutex<Vec<String>>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedEndpoint {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    pub fn push(&self, reply: ChatResult<Option<String>>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl ReplyEndpoint for ScriptedEndpoint {
    fn request_reply(&self, prompt: &str) -> ReplyFuture<'_, ChatResult<Option<String>>> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ChatError::Transport("no scripted reply".to_string())));
        let gate = self.gate.clone();
        Box::pin(async move {
            if let Some(gate) = gate {
                gate.notified().await;
            }
            reply
        })
    }
}
