//! Conversation-related types.

use chat_relay_model::ModelMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Titles derived from a message keep at most this many characters.
pub const TITLE_MAX_CHARS: usize = 50;

const TITLE_ELLIPSIS: &str = "...";

/// The author of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person chatting.
    User,
    /// The model.
    Assistant,
}

/// A message in a conversation. Messages are never edited once appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who wrote the message.
    pub role: Role,
    /// The text of the message.
    pub content: String,
    /// When the message was appended, if known.
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    /// Projects this message into the form sent upstream.
    #[inline]
    pub fn to_model_message(&self) -> ModelMessage {
        match self.role {
            Role::User => ModelMessage::User(self.content.clone()),
            Role::Assistant => ModelMessage::Assistant(self.content.clone()),
        }
    }
}

/// Represents a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Conversation {
    /// Unique identifier.
    pub id: String,
    /// Display title.
    pub title: String,
    /// When the conversation was created.
    pub created_at: DateTime<Utc>,
    /// Messages in append order.
    pub messages: Vec<Message>,
    #[serde(skip)]
    pub(crate) explicit_title: bool,
}

impl Conversation {
    pub(crate) fn new(id: String, title: String, explicit_title: bool) -> Self {
        Self {
            id,
            title,
            created_at: Utc::now(),
            messages: vec![],
            explicit_title,
        }
    }

    /// Returns `true` if the title was given at creation.
    #[inline]
    pub fn has_explicit_title(&self) -> bool {
        self.explicit_title
    }

    /// Returns the summary of this conversation.
    #[inline]
    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            created_at: self.created_at,
            message_count: self.messages.len(),
        }
    }

    pub(crate) fn push(&mut self, message: Message) {
        if self.messages.is_empty() && !self.explicit_title {
            self.title = derive_title(&message.content);
        }
        self.messages.push(message);
    }
}

/// A read-only projection of a conversation, used for listings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Unique identifier.
    pub id: String,
    /// Display title.
    pub title: String,
    /// When the conversation was created.
    pub created_at: DateTime<Utc>,
    /// Number of messages at the time of reading.
    pub message_count: usize,
}

/// Derives a conversation title from the first message.
pub fn derive_title(content: &str) -> String {
    match content.char_indices().nth(TITLE_MAX_CHARS) {
        Some((cut, _)) => format!("{}{TITLE_ELLIPSIS}", &content[..cut]),
        None => content.to_owned(),
    }
}
