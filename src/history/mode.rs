//! Conversation modes.

use core::fmt;

use serde::{Deserialize, Serialize};

/// A conversation namespace with its own history, capacity limits, and
/// system prompt context.
///
/// Modes never share conversations; every [`super::Conversation`] is owned by
/// exactly one mode for its whole lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationMode {
    /// Empathetic counseling conversations.
    Counseling,
    /// Small talk without the counseling framing.
    Casual,
}

impl ConversationMode {
    /// Every mode, in display order.
    pub const ALL: [Self; 2] = [Self::Counseling, Self::Casual];

    /// Stable key used for storage file names and logging.
    #[must_use]
    pub const fn storage_key(self) -> &'static str {
        match self {
            Self::Counseling => "counseling",
            Self::Casual => "casual",
        }
    }

    /// Parse a storage key back into a mode.
    #[must_use]
    pub fn parse_key(key: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.storage_key() == key.trim())
    }
}

impl fmt::Display for ConversationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.storage_key())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_keys_round_trip() {
        for mode in ConversationMode::ALL {
            assert_eq!(ConversationMode::parse_key(mode.storage_key()), Some(mode));
        }
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert_eq!(ConversationMode::parse_key("therapy"), None);
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&ConversationMode::Counseling).unwrap();
        assert_eq!(json, "\"counseling\"");
    }
}
