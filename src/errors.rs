//! Error types for the Mind-Chat core.

use thiserror::Error;

use crate::ids::ConversationId;

/// Mind-Chat core error type.
///
/// Repository and scheduler never swallow errors; the service translates
/// backend faults into [`ChatError::BackendUnavailable`] and
/// [`ChatError::GenerationFailed`] and never leaves a conversation's message
/// sequence partially mutated.
#[derive(Debug, Error)]
pub enum ChatError {
    /// No conversation with this identifier exists in any mode.
    #[error("conversation not found: {id}")]
    NotFound {
        /// Identifier that failed to resolve.
        id: ConversationId,
    },
    /// Marking one more favorite would exceed the per-mode cap.
    #[error("favorite limit reached: at most {max} favorites per mode")]
    FavoriteLimitReached {
        /// Per-mode favorite cap.
        max: usize,
    },
    /// The conversation holds no assistant message to regenerate.
    #[error("conversation has no assistant message")]
    NoAssistantMessage,
    /// The last turn already has a reply, so there is nothing to retry.
    #[error("nothing to retry: the last turn already has a reply")]
    NothingToRetry,
    /// The mode is at capacity and every occupant is favorite-protected.
    #[error("mode is at capacity: {max} conversations, none evictable")]
    ModeAtCapacity {
        /// Per-mode conversation cap.
        max: usize,
    },
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Persistence adapter failure. Non-fatal: in-memory state stays
    /// authoritative and the next successful save reconciles.
    #[error("persistence failure: {0}")]
    Persistence(String),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The inference backend could not be reached.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    /// The inference backend failed while generating.
    #[error("generation failed: {0}")]
    GenerationFailed(String),
    /// The scheduler worker is no longer accepting requests.
    #[error("generation scheduler is shut down")]
    SchedulerUnavailable,
}

/// Convenience result alias for Mind-Chat operations.
pub type ChatResult<T> = Result<T, ChatError>;
