//! Session controller: the surface the UI layer talks to.
//!
//! Every user action is forwarded to the repository or the exchange, and the
//! resulting state is pushed to a [`Presenter`] as a fresh snapshot. Failures
//! reach the presenter as notifications; nothing here is fatal.

use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::chat::errors::{ChatResult, StoreError};
use crate::chat::exchange::{MessageExchange, ReplyEndpoint, ReplyStatus, Resolution};
use crate::chat::repository::{ConversationRepository, SharedRepository};
use crate::chat::store::PersistentStore;
use crate::chat::types::{ConversationId, ConversationSummary, Message, Theme};

/// Prompt shown before clearing every conversation.
pub const CLEAR_ALL_PROMPT: &str = "Clear all conversations? This cannot be undone.";

/// Read-only view handed to the presentation layer after every change.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
    /// Sidebar entries, most recently created first.
    pub conversations: Vec<ConversationSummary>,
    /// Active conversation.
    pub active_id: ConversationId,
    /// Title of the active conversation.
    pub active_title: String,
    /// Messages of the active conversation.
    pub transcript: Vec<Message>,
}

/// Transient message for the user.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Notification {
    /// Informational notice.
    Info(String),
    /// Something went wrong.
    Error(String),
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info(text) => f.write_str(text),
            Self::Error(text) => write!(f, "Error: {text}"),
        }
    }
}

/// Presentation boundary.
pub trait Presenter: Send + Sync {
    /// Show the current state.
    fn render(&self, snapshot: &SessionSnapshot);
    /// Show a transient notification.
    fn notify(&self, notification: Notification);
    /// Toggle the "awaiting reply" indicator for a conversation.
    fn set_awaiting(&self, conversation: &ConversationId, awaiting: bool);
    /// Clear the composed input and give it focus again.
    fn reset_input(&self);
}

/// Coordinates user actions over one repository and exchange.
pub struct SessionController {
    repository: SharedRepository,
    exchange: Arc<MessageExchange>,
    presenter: Arc<dyn Presenter>,
}

impl SessionController {
    /// Initialize the repository from `store` and render the first snapshot.
    pub async fn start(
        store: PersistentStore,
        endpoint: Arc<dyn ReplyEndpoint>,
        presenter: Arc<dyn Presenter>,
    ) -> Self {
        let mut repository = ConversationRepository::new(store);
        let committed = repository.initialize().await;
        let repository = repository.into_shared();
        let exchange = Arc::new(MessageExchange::new(repository.clone(), endpoint));
        let controller = Self {
            repository,
            exchange,
            presenter,
        };
        controller.report_save(committed.save_error);
        controller.refresh().await;
        controller
    }

    /// Shared repository handle.
    #[must_use]
    pub fn repository(&self) -> SharedRepository {
        Arc::clone(&self.repository)
    }

    /// Message exchange handle.
    #[must_use]
    pub fn exchange(&self) -> Arc<MessageExchange> {
        Arc::clone(&self.exchange)
    }

    /// Current state of the session.
    ///
    /// # Errors
    /// Returns `NotInitialized` if the repository has no active conversation.
    pub async fn snapshot(&self) -> ChatResult<SessionSnapshot> {
        snapshot_of(&self.repository).await
    }

    /// Create a conversation titled after its position and make it active.
    pub async fn new_conversation(&self) -> ConversationId {
        let committed = {
            let mut repo = self.repository.lock().await;
            let title = format!("Conversation {}", repo.len() + 1);
            repo.create(&title).await
        };
        self.report_save(committed.save_error);
        self.refresh().await;
        committed.value
    }

    /// Delete a conversation.
    ///
    /// # Errors
    /// Returns `NotFound` if no conversation has this id.
    pub async fn delete_conversation(&self, id: &ConversationId) -> ChatResult<()> {
        let result = self.repository.lock().await.delete(id).await;
        let committed = self.forward(result)?;
        self.report_save(committed.save_error);
        self.refresh().await;
        Ok(())
    }

    /// Switch the active conversation.
    ///
    /// # Errors
    /// Returns `NotFound` if no conversation has this id.
    pub async fn select_conversation(&self, id: &ConversationId) -> ChatResult<()> {
        let result = self.repository.lock().await.select(id).await;
        let committed = self.forward(result)?;
        self.report_save(committed.save_error);
        self.refresh().await;
        Ok(())
    }

    /// Send `text` to the active conversation.
    ///
    /// Returns once the user message is stored and shown; the reply is
    /// resolved in the background and the returned handle yields its outcome.
    ///
    /// # Errors
    /// Returns `EmptyInput` for blank text, without any side effect.
    pub async fn send(&self, text: &str) -> ChatResult<JoinHandle<Resolution>> {
        let mut pending = self.exchange.begin(text).await?;
        let target = pending.target().clone();
        self.report_save(pending.save_error.take());
        self.refresh().await;
        self.presenter.set_awaiting(&target, true);

        let repository = Arc::clone(&self.repository);
        let exchange = Arc::clone(&self.exchange);
        let presenter = Arc::clone(&self.presenter);
        Ok(tokio::spawn(async move {
            let resolution = exchange.complete(pending).await;

            if let Ok(snapshot) = snapshot_of(&repository).await {
                presenter.render(&snapshot);
            }
            presenter.set_awaiting(&target, exchange.is_awaiting(&target));
            if let ReplyStatus::Failed(err) = &resolution.status {
                presenter.notify(Notification::Error(err.to_string()));
            }
            if let Some(err) = &resolution.save_error {
                presenter.notify(save_failed(err));
            }
            presenter.reset_input();
            debug!(conversation = %resolution.target, delivered = resolution.delivered, "exchange resolved");
            resolution
        }))
    }

    /// Discard every conversation after confirmation and start over.
    ///
    /// `confirm` receives [`CLEAR_ALL_PROMPT`]; returns whether anything was
    /// cleared.
    pub async fn clear_all<F>(&self, confirm: F) -> bool
    where
        F: FnOnce(&str) -> bool,
    {
        if !confirm(CLEAR_ALL_PROMPT) {
            debug!("clear all declined");
            return false;
        }
        let committed = self.repository.lock().await.reset().await;
        info!(active = %committed.value, "all conversations cleared");
        self.report_save(committed.save_error);
        self.refresh().await;
        self.presenter
            .notify(Notification::Info("All conversations cleared".to_string()));
        true
    }

    /// Saved theme preference.
    pub async fn theme(&self) -> Theme {
        let store = self.repository.lock().await.store().clone();
        store.load_theme().await
    }

    /// Switch between light and dark and save the choice.
    pub async fn toggle_theme(&self) -> Theme {
        let store = self.repository.lock().await.store().clone();
        let theme = store.load_theme().await.toggled();
        if let Err(err) = store.save_theme(theme).await {
            self.presenter.notify(save_failed(&err));
        }
        theme
    }

    async fn refresh(&self) {
        if let Ok(snapshot) = self.snapshot().await {
            self.presenter.render(&snapshot);
        }
    }

    fn forward<T>(&self, result: ChatResult<T>) -> ChatResult<T> {
        if let Err(err) = &result {
            self.presenter.notify(Notification::Error(err.to_string()));
        }
        result
    }

    fn report_save(&self, save_error: Option<StoreError>) {
        if let Some(err) = save_error {
            self.presenter.notify(save_failed(&err));
        }
    }
}

fn save_failed(err: &StoreError) -> Notification {
    Notification::Error(format!("could not save changes: {err}"))
}

async fn snapshot_of(repository: &SharedRepository) -> ChatResult<SessionSnapshot> {
    let repo = repository.lock().await;
    let active = repo.active()?;
    Ok(SessionSnapshot {
        conversations: repo.summaries(),
        active_id: active.id().clone(),
        active_title: active.title().to_string(),
        transcript: active.messages().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::chat::errors::ChatError;
    use crate::chat::store::{MemorySlots, SlotKeys};
    use crate::chat::test_support::ScriptedEndpoint;
    use crate::chat::types::Role;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Render(SessionSnapshot),
        Notify(Notification),
        Awaiting(ConversationId, bool),
        ResetInput,
    }

    #[derive(Default)]
    struct RecordingPresenter {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingPresenter {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn last_render(&self) -> SessionSnapshot {
            self.events()
                .into_iter()
                .rev()
                .find_map(|event| match event {
                    Event::Render(snapshot) => Some(snapshot),
                    _ => None,
                })
                .unwrap()
        }

        fn notifications(&self) -> Vec<Notification> {
            self.events()
                .into_iter()
                .filter_map(|event| match event {
                    Event::Notify(notification) => Some(notification),
                    _ => None,
                })
                .collect()
        }
    }

    impl Presenter for RecordingPresenter {
        fn render(&self, snapshot: &SessionSnapshot) {
            self.events.lock().unwrap().push(Event::Render(snapshot.clone()));
        }

        fn notify(&self, notification: Notification) {
            self.events.lock().unwrap().push(Event::Notify(notification));
        }

        fn set_awaiting(&self, conversation: &ConversationId, awaiting: bool) {
            self.events
                .lock()
                .unwrap()
                .push(Event::Awaiting(conversation.clone(), awaiting));
        }

        fn reset_input(&self) {
            self.events.lock().unwrap().push(Event::ResetInput);
        }
    }

    async fn session_with(
        backend: Arc<MemorySlots>,
        endpoint: Arc<ScriptedEndpoint>,
    ) -> (SessionController, Arc<RecordingPresenter>) {
        let presenter = Arc::new(RecordingPresenter::default());
        let store = PersistentStore::new(backend, SlotKeys::default());
        let controller = SessionController::start(store, endpoint, presenter.clone()).await;
        (controller, presenter)
    }

    async fn session() -> (SessionController, Arc<RecordingPresenter>, Arc<ScriptedEndpoint>) {
        let endpoint = Arc::new(ScriptedEndpoint::new());
        let (controller, presenter) =
            session_with(Arc::new(MemorySlots::new()), endpoint.clone()).await;
        (controller, presenter, endpoint)
    }

    #[tokio::test]
    async fn test_start_renders_seed_conversation() {
        let (_controller, presenter, _) = session().await;

        let snapshot = presenter.last_render();

        assert_eq!(snapshot.conversations.len(), 1);
        assert_eq!(snapshot.active_title, "New Conversation");
        assert!(snapshot.transcript.is_empty());
        assert!(presenter.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_new_conversation_is_numbered_and_active() {
        let (controller, presenter, _) = session().await;

        let id = controller.new_conversation().await;

        let snapshot = presenter.last_render();
        assert_eq!(snapshot.active_id, id);
        assert_eq!(snapshot.active_title, "Conversation 2");
        assert_eq!(snapshot.conversations[0].id, id);
    }

    #[tokio::test]
    async fn test_send_shows_user_message_then_reply() {
        let (controller, presenter, endpoint) = session().await;
        endpoint.push(Ok(Some("hi there".to_string())));

        let handle = controller.send("hello").await.unwrap();
        let optimistic = presenter.last_render();
        assert_eq!(optimistic.transcript.len(), 1);
        assert_eq!(optimistic.transcript[0].role, Role::User);
        assert_eq!(optimistic.transcript[0].text, "hello");

        let resolution = handle.await.unwrap();

        assert!(resolution.delivered);
        let done = presenter.last_render();
        assert_eq!(done.transcript.len(), 2);
        assert_eq!(done.transcript[1].text, "hi there");
        let events = presenter.events();
        let target = resolution.target;
        assert!(events.contains(&Event::Awaiting(target.clone(), true)));
        assert!(events.contains(&Event::Awaiting(target, false)));
        assert_eq!(events.last(), Some(&Event::ResetInput));
    }

    #[tokio::test]
    async fn test_awaiting_stays_on_until_last_reply_resolves() {
        let (controller, presenter, endpoint) = session().await;
        endpoint.push(Ok(Some("one back".to_string())));
        endpoint.push(Ok(Some("two back".to_string())));

        let target = controller.snapshot().await.unwrap().active_id;
        let first = controller.send("one").await.unwrap();
        let second = controller.send("two").await.unwrap();
        assert_eq!(controller.exchange().in_flight(), 2);

        first.await.unwrap();
        second.await.unwrap();

        let awaiting: Vec<bool> = presenter
            .events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Awaiting(id, on) if id == target => Some(on),
                _ => None,
            })
            .collect();
        assert_eq!(awaiting, vec![true, true, true, false]);
        assert!(!controller.exchange().is_awaiting(&target));
        assert_eq!(presenter.last_render().transcript.len(), 4);
    }

    #[tokio::test]
    async fn test_blank_send_has_no_side_effects() {
        let (controller, presenter, endpoint) = session().await;
        let before = presenter.events();

        let result = controller.send("   ").await;

        assert!(matches!(result, Err(ChatError::EmptyInput)));
        assert_eq!(presenter.events(), before);
        assert!(endpoint.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_failed_send_notifies_and_records_error() {
        let (controller, presenter, endpoint) = session().await;
        endpoint.push(Err(ChatError::Server(500)));

        controller.send("hello").await.unwrap().await.unwrap();

        let snapshot = presenter.last_render();
        assert_eq!(snapshot.transcript.len(), 2);
        assert!(snapshot.transcript[1].text.contains("Server error: 500"));
        assert_eq!(
            presenter.notifications(),
            vec![Notification::Error("Server error: 500".to_string())]
        );
    }

    #[tokio::test]
    async fn test_clear_all_requires_confirmation() {
        let (controller, presenter, _) = session().await;
        for _ in 0..4 {
            controller.new_conversation().await;
        }
        assert_eq!(presenter.last_render().conversations.len(), 5);

        let mut asked = String::new();
        let cleared = controller
            .clear_all(|prompt| {
                asked = prompt.to_string();
                false
            })
            .await;
        assert!(!cleared);
        assert_eq!(asked, CLEAR_ALL_PROMPT);
        assert_eq!(controller.snapshot().await.unwrap().conversations.len(), 5);

        assert!(controller.clear_all(|_| true).await);

        let snapshot = presenter.last_render();
        assert_eq!(snapshot.conversations.len(), 1);
        assert!(snapshot.transcript.is_empty());
        assert_eq!(snapshot.conversations[0].id, snapshot.active_id);
        assert_eq!(
            presenter.notifications().last(),
            Some(&Notification::Info("All conversations cleared".to_string()))
        );
    }

    #[tokio::test]
    async fn test_unknown_ids_are_reported() {
        let (controller, presenter, _) = session().await;
        let missing = ConversationId::from("missing");

        assert!(matches!(
            controller.select_conversation(&missing).await,
            Err(ChatError::NotFound(_))
        ));
        assert!(controller.delete_conversation(&missing).await.is_err());
        assert_eq!(presenter.notifications().len(), 2);
    }

    #[tokio::test]
    async fn test_select_and_delete_update_view() {
        let (controller, presenter, _) = session().await;
        let first = controller.snapshot().await.unwrap().active_id;
        let second = controller.new_conversation().await;

        controller.select_conversation(&first).await.unwrap();
        assert_eq!(presenter.last_render().active_id, first);

        controller.delete_conversation(&first).await.unwrap();
        let snapshot = presenter.last_render();
        assert_eq!(snapshot.active_id, second);
        assert_eq!(snapshot.conversations.len(), 1);
    }

    #[tokio::test]
    async fn test_save_failure_is_notified_but_not_fatal() {
        let endpoint = Arc::new(ScriptedEndpoint::new());
        let (controller, presenter) =
            session_with(Arc::new(MemorySlots::with_quota(16)), endpoint).await;

        let id = controller.new_conversation().await;

        assert_eq!(presenter.last_render().active_id, id);
        assert!(
            presenter
                .notifications()
                .iter()
                .all(|n| matches!(n, Notification::Error(text) if text.contains("quota")))
        );
        assert_eq!(presenter.notifications().len(), 2);
    }

    #[tokio::test]
    async fn test_theme_toggle_is_saved() {
        let backend = Arc::new(MemorySlots::new());
        let (controller, _) = session_with(backend.clone(), Arc::new(ScriptedEndpoint::new())).await;
        assert_eq!(controller.theme().await, Theme::Dark);

        assert_eq!(controller.toggle_theme().await, Theme::Light);

        let store = PersistentStore::new(backend, SlotKeys::default());
        assert_eq!(store.load_theme().await, Theme::Light);
    }
}
