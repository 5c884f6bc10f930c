//! Conversation entity and title derivation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::ConversationId;

use super::message::{ChatMessage, MessageRole};
use super::mode::ConversationMode;

/// Maximum title length in characters. The title is derived once from the
/// first user message and never recomputed afterward.
pub const TITLE_MAX_CHARS: usize = 30;

/// A titled, ordered sequence of chat turns belonging to one mode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Unique identifier, assigned at creation, never reused.
    pub id: ConversationId,
    /// Owning mode, fixed at creation.
    pub mode: ConversationMode,
    /// Display title; empty until the first user message arrives.
    pub title: String,
    /// Whether the conversation is protected from automatic eviction.
    pub favorite: bool,
    /// Refreshed on any mutation.
    pub updated_at: DateTime<Utc>,
    /// Ordered turns, append-only except regenerate.
    pub messages: Vec<ChatMessage>,
}

impl Conversation {
    /// Allocate a new empty conversation in the given mode.
    #[must_use]
    pub fn new(mode: ConversationMode) -> Self {
        Self {
            id: ConversationId::new(),
            mode,
            title: String::new(),
            favorite: false,
            updated_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    /// Whether the conversation holds no messages yet. Empty conversations
    /// are session drafts: they are listed but never persisted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Index of the last assistant message, if any.
    #[must_use]
    pub fn last_assistant_index(&self) -> Option<usize> {
        self.messages
            .iter()
            .rposition(|message| message.role == MessageRole::Assistant)
    }

    /// Append a message, deriving the title from the first user message.
    pub(crate) fn push_message(&mut self, message: ChatMessage) {
        if self.title.is_empty() && message.role == MessageRole::User {
            self.title = derive_title(&message.content);
        }
        self.messages.push(message);
        self.touch();
    }

    /// Refresh `updated_at`.
    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Derive a bounded single-line title from the first user message.
fn derive_title(text: &str) -> String {
    let flattened: String = text
        .chars()
        .map(|ch| if ch == '\n' || ch == '\r' { ' ' } else { ch })
        .take(TITLE_MAX_CHARS)
        .collect();
    flattened.trim().to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_title_derived_once_from_first_user_message() {
        let mut conversation = Conversation::new(ConversationMode::Counseling);
        conversation.push_message(ChatMessage::user("最近眠れない"));
        conversation.push_message(ChatMessage::user("別の話題"));
        assert_eq!(conversation.title, "最近眠れない");
    }

    #[test]
    fn test_title_not_derived_from_assistant_message() {
        let mut conversation = Conversation::new(ConversationMode::Casual);
        conversation.push_message(ChatMessage::assistant("こんにちは"));
        assert!(conversation.title.is_empty());
        conversation.push_message(ChatMessage::user("こちらこそ"));
        assert_eq!(conversation.title, "こちらこそ");
    }

    #[test]
    fn test_title_is_truncated_and_flattened() {
        let mut conversation = Conversation::new(ConversationMode::Counseling);
        let long = "a\nb".to_string() + &"x".repeat(100);
        conversation.push_message(ChatMessage::user(long));
        assert!(conversation.title.chars().count() <= TITLE_MAX_CHARS);
        assert!(!conversation.title.contains('\n'));
    }

    #[test]
    fn test_last_assistant_index() {
        let mut conversation = Conversation::new(ConversationMode::Counseling);
        assert_eq!(conversation.last_assistant_index(), None);
        conversation.push_message(ChatMessage::user("hi"));
        conversation.push_message(ChatMessage::assistant("hello"));
        conversation.push_message(ChatMessage::user("more"));
        assert_eq!(conversation.last_assistant_index(), Some(1));
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let conversation = Conversation::new(ConversationMode::Counseling);
        let value = serde_json::to_value(&conversation).unwrap();
        assert!(value.get("updatedAt").is_some());
        assert_eq!(
            value.get("mode").and_then(|v| v.as_str()),
            Some("counseling")
        );
    }
}
