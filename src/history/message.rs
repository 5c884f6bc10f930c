//! Chat message model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author of a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The human side of the conversation.
    User,
    /// The model side of the conversation.
    Assistant,
}

/// One turn in a conversation.
///
/// Immutable once appended, except for regenerate, which replaces the last
/// assistant message in place.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Author role.
    pub role: MessageRole,
    /// Message text.
    pub content: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Build a user message stamped now.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    /// Build an assistant message stamped now.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_set_roles() {
        assert_eq!(ChatMessage::user("hi").role, MessageRole::User);
        assert_eq!(ChatMessage::assistant("hello").role, MessageRole::Assistant);
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let value = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert!(value.get("createdAt").is_some());
        assert_eq!(value.get("role").and_then(|v| v.as_str()), Some("user"));
    }
}
