//! Inference backend boundary.
//!
//! The backend is a single shared, non-reentrant resource: concurrent calls
//! are undefined behavior, so the scheduler worker is the only caller and
//! the handle never leaves it.

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors surfaced by an inference backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The generation was cancelled before completion.
    #[error("generation cancelled")]
    Cancelled,
    /// The backend could not be reached or is not running.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// The backend failed while generating.
    #[error("generation failed: {0}")]
    Generation(String),
}

/// A local inference backend.
///
/// `generate` blocks for the duration of the call and streams fragments
/// through `on_token` as they are produced. The backend must check `cancel`
/// between fragments and stop cooperatively with
/// [`BackendError::Cancelled`]; `on_token` returning `false` is an
/// equivalent stop request. Fragments already delivered are kept by the
/// caller, not rolled back.
pub trait InferenceBackend: Send + Sync {
    /// Run one generation, returning the assembled reply text.
    ///
    /// # Errors
    /// [`BackendError::Cancelled`] on cooperative stop,
    /// [`BackendError::Unavailable`] when the backend cannot be reached,
    /// [`BackendError::Generation`] for any other fault.
    fn generate(
        &self,
        prompt: &str,
        on_token: &mut dyn FnMut(&str) -> bool,
        cancel: &CancellationToken,
    ) -> Result<String, BackendError>;
}
