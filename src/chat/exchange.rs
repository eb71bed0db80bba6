//! Send/receive cycle against the remote reply endpoint.
//!
//! A send is pinned to the conversation that is active when it starts. The
//! user message is appended and saved before any request goes out; the
//! reply, a fallback or an error placeholder is appended to the same pinned
//! conversation when the request resolves, even if another conversation has
//! been selected meanwhile. Sends are not serialized: two sends on the same
//! conversation run independently and their replies may land in either order.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::chat::config::ChatConfig;
use crate::chat::errors::{ChatError, ChatResult, StoreError};
use crate::chat::repository::SharedRepository;
use crate::chat::types::{ConversationId, Message};

/// Text stored when the endpoint answers without a usable `reply`.
///
/// Earlier web clients wrote `Sorry — no reply.`; transcripts saved by them
/// keep that wording.
pub const FALLBACK_REPLY: &str = "Sorry, no reply.";

/// Prefix of the transcript entry recorded for a failed exchange.
pub const FAILURE_MARKER: &str = "⚠️ Failed to fetch reply";

/// Meta annotation of a fallback reply.
pub const FALLBACK_META: &str = "fallback";

/// Boxed future type for endpoint calls.
pub type ReplyFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A request/response service that answers a prompt.
pub trait ReplyEndpoint: Send + Sync {
    /// Ask for a reply to `prompt`.
    ///
    /// `Ok(None)` means the endpoint answered successfully but without a
    /// usable reply text.
    ///
    /// # Errors
    /// Returns `Transport`, `Server` or `MalformedReply`.
    fn request_reply(&self, prompt: &str) -> ReplyFuture<'_, ChatResult<Option<String>>>;
}

#[derive(Serialize)]
struct ReplyRequest<'a> {
    prompt: &'a str,
}

/// Extract the reply text from a decoded response body.
///
/// Anything other than a non-empty string under `reply` counts as missing.
#[must_use]
pub fn reply_text(body: &Value) -> Option<String> {
    body.get("reply")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// JSON-over-HTTP reply endpoint.
pub struct HttpReplyEndpoint {
    client: Client,
    url: Url,
}

impl HttpReplyEndpoint {
    /// Build an endpoint client from the chat configuration.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(config: &ChatConfig) -> ChatResult<Self> {
        let url = Url::parse(&config.endpoint_url)
            .map_err(|err| ChatError::InvalidConfig(format!("endpoint_url: {err}")))?;
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| ChatError::InvalidConfig(format!("http client: {err}")))?;
        Ok(Self { client, url })
    }

    /// Endpoint URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

impl ReplyEndpoint for HttpReplyEndpoint {
    fn request_reply(&self, prompt: &str) -> ReplyFuture<'_, ChatResult<Option<String>>> {
        let prompt = prompt.to_string();
        Box::pin(async move {
            let response = self
                .client
                .post(self.url.clone())
                .json(&ReplyRequest { prompt: &prompt })
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(ChatError::Server(status.as_u16()));
            }

            let body = response.text().await?;
            let value: Value = serde_json::from_str(&body)
                .map_err(|err| ChatError::MalformedReply(err.to_string()))?;
            Ok(reply_text(&value))
        })
    }
}

/// A send whose user message is stored and whose reply is still to come.
///
/// The target counts as awaiting from [`MessageExchange::begin`] until the
/// pending exchange is completed or dropped.
#[derive(Debug)]
pub struct PendingExchange {
    target: ConversationId,
    prompt: String,
    awaiting: AwaitingGuard,
    /// Save failure from storing the user message.
    pub save_error: Option<StoreError>,
}

impl PendingExchange {
    /// Conversation the reply will be appended to.
    #[must_use]
    pub const fn target(&self) -> &ConversationId {
        &self.target
    }

    /// Trimmed prompt sent to the endpoint.
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }
}

/// How the endpoint call turned out.
#[derive(Debug)]
pub enum ReplyStatus {
    /// The endpoint supplied reply text.
    Replied,
    /// The endpoint answered without usable text; the fallback was stored.
    Fallback,
    /// The call failed; an error placeholder was stored.
    Failed(ChatError),
}

/// Final state of one exchange.
#[derive(Debug)]
pub struct Resolution {
    /// Pinned target conversation.
    pub target: ConversationId,
    /// Endpoint outcome.
    pub status: ReplyStatus,
    /// The assistant message built from the outcome.
    pub message: Message,
    /// False when the target was deleted before the reply arrived.
    pub delivered: bool,
    /// Save failure from storing the assistant message.
    pub save_error: Option<StoreError>,
}

/// Build the transcript entry for a failed exchange.
#[must_use]
pub fn failure_message(err: &ChatError) -> Message {
    Message::assistant(format!("{FAILURE_MARKER}: {err}")).with_meta(err.kind())
}

/// Per-conversation count of in-flight requests.
#[derive(Clone, Debug, Default)]
struct AwaitingTracker {
    counts: Arc<DashMap<ConversationId, usize>>,
}

impl AwaitingTracker {
    fn enter(&self, id: &ConversationId) -> AwaitingGuard {
        *self.counts.entry(id.clone()).or_insert(0) += 1;
        AwaitingGuard {
            tracker: self.clone(),
            id: id.clone(),
        }
    }

    fn is_awaiting(&self, id: &ConversationId) -> bool {
        self.counts.get(id).is_some_and(|count| *count > 0)
    }

    fn in_flight(&self) -> usize {
        self.counts.iter().map(|entry| *entry.value()).sum()
    }
}

#[derive(Debug)]
struct AwaitingGuard {
    tracker: AwaitingTracker,
    id: ConversationId,
}

impl Drop for AwaitingGuard {
    fn drop(&mut self) {
        let drained = self
            .tracker
            .counts
            .get_mut(&self.id)
            .map(|mut count| {
                *count = count.saturating_sub(1);
                *count == 0
            })
            .unwrap_or(false);
        if drained {
            self.tracker.counts.remove_if(&self.id, |_, count| *count == 0);
        }
    }
}

/// Orchestrates send cycles over a shared repository.
pub struct MessageExchange {
    repository: SharedRepository,
    endpoint: Arc<dyn ReplyEndpoint>,
    awaiting: AwaitingTracker,
}

impl MessageExchange {
    /// Create an exchange over `repository` talking to `endpoint`.
    #[must_use]
    pub fn new(repository: SharedRepository, endpoint: Arc<dyn ReplyEndpoint>) -> Self {
        Self {
            repository,
            endpoint,
            awaiting: AwaitingTracker::default(),
        }
    }

    /// Store the user message in the active conversation and pin it.
    ///
    /// # Errors
    /// Returns `EmptyInput` for blank text (nothing is stored) and
    /// `NotInitialized` before the repository is initialized.
    pub async fn begin(&self, raw_text: &str) -> ChatResult<PendingExchange> {
        let prompt = raw_text.trim();
        if prompt.is_empty() {
            return Err(ChatError::EmptyInput);
        }

        let mut repo = self.repository.lock().await;
        let target = repo.active()?.id().clone();
        let committed = repo
            .append(&target, Message::user(prompt))
            .await
            .ok_or_else(|| ChatError::NotFound(target.clone()))?;
        debug!(%target, messages = committed.value, "user message stored");

        let awaiting = self.awaiting.enter(&target);
        Ok(PendingExchange {
            target,
            prompt: prompt.to_string(),
            awaiting,
            save_error: committed.save_error,
        })
    }

    /// Call the endpoint and store its outcome in the pinned conversation.
    pub async fn complete(&self, pending: PendingExchange) -> Resolution {
        let PendingExchange {
            target,
            prompt,
            awaiting,
            ..
        } = pending;

        let result = self.endpoint.request_reply(&prompt).await;

        let (status, message) = match result {
            Ok(Some(text)) => (ReplyStatus::Replied, Message::assistant(text)),
            Ok(None) => (
                ReplyStatus::Fallback,
                Message::assistant(FALLBACK_REPLY).with_meta(FALLBACK_META),
            ),
            Err(err) => {
                warn!(%target, error = %err, "reply request failed");
                let message = failure_message(&err);
                (ReplyStatus::Failed(err), message)
            }
        };

        let committed = self
            .repository
            .lock()
            .await
            .append(&target, message.clone())
            .await;
        let (delivered, save_error) = match committed {
            Some(committed) => (true, committed.save_error),
            None => {
                debug!(%target, "conversation deleted before reply arrived, dropping it");
                (false, None)
            }
        };
        drop(awaiting);

        Resolution {
            target,
            status,
            message,
            delivered,
            save_error,
        }
    }

    /// Run a full send cycle and wait for its resolution.
    ///
    /// # Errors
    /// Returns the errors of [`Self::begin`]; endpoint failures are part of
    /// the resolution instead.
    pub async fn send(&self, raw_text: &str) -> ChatResult<Resolution> {
        let pending = self.begin(raw_text).await?;
        Ok(self.complete(pending).await)
    }

    /// Whether a reply is outstanding for `id`.
    #[must_use]
    pub fn is_awaiting(&self, id: &ConversationId) -> bool {
        self.awaiting.is_awaiting(id)
    }

    /// Total number of outstanding replies.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.awaiting.in_flight()
    }
}
