//! Generation: the inference backend boundary, prompt assembly, and the
//! single-consumer scheduler that serializes and cancels backend calls.

/// Inference backend boundary.
pub mod backend;
/// Streaming Ollama client implementing the backend boundary.
pub mod ollama;
/// Chat prompt assembly under a character budget.
pub mod prompt;
/// Single-consumer generation scheduler.
pub mod scheduler;

pub use backend::{BackendError, InferenceBackend};
pub use ollama::OllamaBackend;
pub use scheduler::{
    EventReceiver, GenerationEvent, GenerationScheduler, RequestHandle, RequestState,
};
