//! Conversation history: data model, bounded repository, persistence port.

/// Conversation entity and title derivation.
pub mod conversation;
/// Chat message model.
pub mod message;
/// Conversation modes.
pub mod mode;
/// Bounded, favorite-aware conversation repository.
pub mod repository;
/// Persistence port and the bundled adapters.
pub mod store;

pub use conversation::Conversation;
pub use message::{ChatMessage, MessageRole};
pub use mode::ConversationMode;
pub use repository::{AppendOutcome, ConversationRepository};
pub use store::{HistoryStore, JsonHistoryStore, MemoryHistoryStore};
