//! Conversation and message records.
//!
//! These are the shapes written to the durable slot. Deserialization also
//! accepts what older browser builds wrote (`"bot"` roles, `"ts"` timestamps,
//! untitled conversations), and keeps unknown keys so they are written back
//! unchanged.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Title given to seed conversations and blank titles.
pub const DEFAULT_TITLE: &str = "New Conversation";

/// Number of characters shown in a sidebar preview.
pub const PREVIEW_CHARS: usize = 60;

/// Preview shown for a conversation without messages.
pub const EMPTY_PREVIEW: &str = "Empty";

/// Current time in milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Opaque conversation identifier.
///
/// Freshly generated ids are simple-format UUIDv4 strings; ids loaded from
/// storage are kept verbatim whatever their format.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Generate a new unique identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Author of a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Text typed by the user.
    User,
    /// Reply from the remote endpoint, or the placeholder standing in for it.
    #[serde(alias = "bot")]
    Assistant,
}

impl Role {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "assistant" | "bot" => Ok(Self::Assistant),
            _ => Err(value.to_string()),
        }
    }
}

/// One turn in a conversation. Never modified once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Author of the message.
    pub role: Role,
    /// Message text.
    pub text: String,
    /// Timestamp in milliseconds since Unix epoch.
    #[serde(alias = "ts")]
    pub timestamp: i64,
    /// Optional annotation (fallback or error kind for assistant messages).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Message {
    /// Build a message stamped with the current time.
    #[must_use]
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: now_ms(),
            meta: None,
            extra: Map::new(),
        }
    }

    /// Build a user message.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Build an assistant message.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Attach an annotation.
    #[must_use]
    pub fn with_meta(mut self, meta: impl Into<String>) -> Self {
        self.meta = Some(meta.into());
        self
    }
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

/// A named, ordered log of messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    id: ConversationId,
    #[serde(default = "default_title")]
    title: String,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Conversation {
    /// Create an empty conversation with a fresh id.
    ///
    /// A blank title falls back to [`DEFAULT_TITLE`].
    #[must_use]
    pub fn new(title: &str) -> Self {
        let title = title.trim();
        Self {
            id: ConversationId::new(),
            title: if title.is_empty() {
                default_title()
            } else {
                title.to_string()
            },
            messages: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Create the empty conversation that keeps a collection non-empty.
    #[must_use]
    pub fn seed() -> Self {
        Self::new(DEFAULT_TITLE)
    }

    /// Conversation identifier.
    #[must_use]
    pub const fn id(&self) -> &ConversationId {
        &self.id
    }

    /// Display title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Messages in append order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Append a message at the end of the log.
    pub(crate) fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Sidebar preview: the start of the last message, or [`EMPTY_PREVIEW`].
    #[must_use]
    pub fn preview(&self) -> String {
        self.messages.last().map_or_else(
            || EMPTY_PREVIEW.to_string(),
            |last| last.text.chars().take(PREVIEW_CHARS).collect(),
        )
    }

    /// Build the sidebar entry for this conversation.
    #[must_use]
    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            preview: self.preview(),
            message_count: self.messages.len(),
        }
    }
}

/// Sidebar entry for a conversation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Conversation identifier.
    pub id: ConversationId,
    /// Display title.
    pub title: String,
    /// Start of the last message, or "Empty".
    pub preview: String,
    /// Number of messages in the conversation.
    pub message_count: usize,
}

/// Light/dark display preference.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    /// Light background.
    Light,
    /// Dark background.
    #[default]
    Dark,
}

impl Theme {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }

    /// The other theme.
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Light => Self::Dark,
            Self::Dark => Self::Light,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            other => Err(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = ConversationId::new();
        let b = ConversationId::new();
        assert_ne!(a, b);
        assert!(!a.as_str().is_empty());
    }

    #[test]
    fn test_blank_title_uses_default() {
        let conv = Conversation::new("   ");
        assert_eq!(conv.title(), DEFAULT_TITLE);
        assert!(conv.messages().is_empty());
    }

    #[test]
    fn test_legacy_browser_shape_is_accepted() {
        let raw = r#"[{"id":"lq2x9k4f8a1b","title":"Conversation 2","messages":[
            {"role":"user","text":"hello","ts":1700000000000},
            {"role":"bot","text":"hi","ts":1700000000500}
        ]}]"#;
        let convs: Vec<Conversation> = serde_json::from_str(raw).unwrap();

        assert_eq!(convs[0].id().as_str(), "lq2x9k4f8a1b");
        assert_eq!(convs[0].messages()[1].role, Role::Assistant);
        assert_eq!(convs[0].messages()[0].timestamp, 1_700_000_000_000);
    }

    #[test]
    fn test_unknown_fields_round_trip() {
        let raw = r#"{"id":"c1","title":"T","messages":[
            {"role":"user","text":"x","timestamp":1,"lang":"fr"}
        ],"pinned":true}"#;
        let conv: Conversation = serde_json::from_str(raw).unwrap();
        let value = serde_json::to_value(&conv).unwrap();

        assert_eq!(value["pinned"], Value::Bool(true));
        assert_eq!(value["messages"][0]["lang"], Value::String("fr".to_string()));
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let raw = r#"{"role":"narrator","text":"x","timestamp":1}"#;
        assert!(serde_json::from_str::<Message>(raw).is_err());
        assert!("narrator".parse::<Role>().is_err());
    }

    #[test]
    fn test_preview_truncates_last_message() {
        let mut conv = Conversation::seed();
        assert_eq!(conv.preview(), EMPTY_PREVIEW);

        conv.push_message(Message::user("a".repeat(100)));
        assert_eq!(conv.preview().chars().count(), PREVIEW_CHARS);
        assert_eq!(conv.summary().message_count, 1);
    }

    #[test]
    fn test_theme_parse_and_toggle() {
        assert_eq!("light".parse::<Theme>(), Ok(Theme::Light));
        assert_eq!(Theme::default(), Theme::Dark);
        assert_eq!(Theme::Dark.toggled(), Theme::Light);
    }
}
