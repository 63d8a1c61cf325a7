use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Title shown for a conversation that has no user message yet.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Who authored a message.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// One piece of a message body.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Part {
    pub text: String,
    // Set when the part stands in for an uploaded image
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub image: bool,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), image: false }
    }

    pub fn image(text: impl Into<String>) -> Self {
        Self { text: text.into(), image: true }
    }
}

/// Opaque handle to an uploaded image (a `data:` URL).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(transparent)]
pub struct ImageRef(pub String);

// Represents a single message in a conversation
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    #[serde(default = "Uuid::new_v4")] // Generate a new UUID if missing during deserialization
    pub id: Uuid,
    pub role: Role,
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<ImageRef>,
    // Transient placeholder shown while a request is in flight
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_processing: bool,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            parts: vec![Part::text(text)],
            image_ref: None,
            is_processing: false,
        }
    }

    pub fn user_image(text: impl Into<String>, image_ref: ImageRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            parts: vec![Part::image(text)],
            image_ref: Some(image_ref),
            is_processing: false,
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Model,
            parts: vec![Part::text(text)],
            image_ref: None,
            is_processing: false,
        }
    }

    pub fn placeholder(text: impl Into<String>) -> Self {
        Self {
            is_processing: true,
            ..Self::model(text)
        }
    }

    /// Text of the first part, or "" for a message without parts.
    pub fn text(&self) -> &str {
        self.parts.first().map(|p| p.text.as_str()).unwrap_or("")
    }
}

/// Stable identifier of a conversation. Backed by a UUID v7, so ids sort by creation time.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// Represents one chat thread as kept in the registry and the store
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub transcript: Vec<Message>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub completed: bool,
}

impl Conversation {
    pub fn title(&self) -> String {
        derive_title(&self.transcript)
    }

    /// Copy suitable for the persistent store: in-flight placeholders are dropped.
    pub fn persisted(&self) -> Conversation {
        Conversation {
            id: self.id,
            transcript: self
                .transcript
                .iter()
                .filter(|m| !m.is_processing)
                .cloned()
                .collect(),
            last_updated: self.last_updated,
            completed: self.completed,
        }
    }
}

/// Title of a transcript: the first user message's text, or [`DEFAULT_TITLE`].
pub fn derive_title(transcript: &[Message]) -> String {
    transcript
        .iter()
        .find(|m| m.role == Role::User)
        .and_then(|m| m.parts.first())
        .map(|p| p.text.clone())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string())
}

/// A `{role, text}` turn of prior conversation sent along with a chat request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryTurn {
    pub role: Role,
    pub text: String,
}
