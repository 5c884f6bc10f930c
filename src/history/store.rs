//! Persistence port for per-mode conversation history.
//!
//! One JSON record per mode: `{ "conversations": [...] }`. A missing or
//! blank record is an empty history, not an error. Saves are atomic
//! (write-new-then-rename), so a crash between mutation and save loses at
//! most that save and never corrupts the prior record.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{ChatError, ChatResult};

use super::conversation::Conversation;
use super::mode::ConversationMode;

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// On-disk record wrapping a mode's conversations.
#[derive(Debug, Serialize, Deserialize)]
struct HistoryRecord {
    conversations: Vec<Conversation>,
}

/// Persistence port for conversation history.
///
/// `load` is called once per mode at repository initialization; `save` is
/// called write-through after every mutating repository operation, with the
/// mode's durable (non-empty) conversations in most-recent-first order.
pub trait HistoryStore: Send + Sync {
    /// Load a mode's conversations.
    ///
    /// # Errors
    /// Returns an error if the record exists but cannot be read or parsed.
    fn load(&self, mode: ConversationMode) -> StoreFuture<'_, ChatResult<Vec<Conversation>>>;

    /// Replace a mode's stored conversations.
    ///
    /// # Errors
    /// Returns an error if the record cannot be written.
    fn save(
        &self,
        mode: ConversationMode,
        conversations: Vec<Conversation>,
    ) -> StoreFuture<'_, ChatResult<()>>;
}

/// JSON-file adapter: one record file per mode under a base directory.
pub struct JsonHistoryStore {
    dir: PathBuf,
}

impl JsonHistoryStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn new(dir: impl AsRef<Path>) -> ChatResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Record file path for a mode.
    fn record_path(&self, mode: ConversationMode) -> PathBuf {
        self.dir.join(format!("{}.json", mode.storage_key()))
    }

    /// Scratch path used for the atomic replace; same directory so the
    /// rename stays on one filesystem.
    fn scratch_path(&self, mode: ConversationMode) -> PathBuf {
        self.dir.join(format!("{}.json.tmp", mode.storage_key()))
    }
}

impl HistoryStore for JsonHistoryStore {
    fn load(&self, mode: ConversationMode) -> StoreFuture<'_, ChatResult<Vec<Conversation>>> {
        Box::pin(async move {
            let path = self.record_path(mode);
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(err) => return Err(ChatError::Io(err)),
            };
            if bytes.iter().all(u8::is_ascii_whitespace) {
                return Ok(Vec::new());
            }
            let record: HistoryRecord = serde_json::from_slice(&bytes)?;
            debug!(
                mode = %mode,
                count = record.conversations.len(),
                "Loaded history record"
            );
            Ok(record.conversations)
        })
    }

    fn save(
        &self,
        mode: ConversationMode,
        conversations: Vec<Conversation>,
    ) -> StoreFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            let json = serde_json::to_vec_pretty(&HistoryRecord { conversations })?;
            let scratch = self.scratch_path(mode);
            let path = self.record_path(mode);
            tokio::fs::write(&scratch, &json).await?;
            tokio::fs::rename(&scratch, &path).await?;
            debug!(mode = %mode, bytes = json.len(), "Saved history record");
            Ok(())
        })
    }
}

/// In-memory adapter for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryHistoryStore {
    records: DashMap<ConversationMode, Vec<Conversation>>,
}

impl MemoryHistoryStore {
    /// Create an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn load(&self, mode: ConversationMode) -> StoreFuture<'_, ChatResult<Vec<Conversation>>> {
        Box::pin(async move {
            Ok(self
                .records
                .get(&mode)
                .map(|entry| entry.value().clone())
                .unwrap_or_default())
        })
    }

    fn save(
        &self,
        mode: ConversationMode,
        conversations: Vec<Conversation>,
    ) -> StoreFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            self.records.insert(mode, conversations);
            Ok(())
        })
    }
}
