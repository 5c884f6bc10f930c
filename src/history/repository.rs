//! Bounded, favorite-aware conversation repository.
//!
//! One namespace per mode, each guarded by its own mutex so no two mutations
//! on the same mode interleave partially. Conversations are kept ordered
//! most-recently-updated first. Capacity is enforced when an append turns a
//! brand-new conversation into a durable record; the evicted identifier, if
//! any, is returned so callers and tests can assert on it instead of
//! inferring it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::HistorySettings;
use crate::errors::{ChatError, ChatResult};
use crate::ids::ConversationId;

use super::conversation::Conversation;
use super::message::ChatMessage;
use super::mode::ConversationMode;
use super::store::HistoryStore;

/// Result of appending a message, with the eviction made observable.
#[derive(Clone, Debug)]
pub struct AppendOutcome {
    /// The conversation after the append.
    pub conversation: Conversation,
    /// Conversation evicted to enforce the capacity bound, if any.
    pub evicted: Option<ConversationId>,
}

/// Per-mode namespace. Conversations are ordered most-recently-updated
/// first; empty conversations are drafts that never persist and never count
/// toward the capacity bound.
#[derive(Default)]
struct ModeNamespace {
    conversations: Vec<Conversation>,
}

impl ModeNamespace {
    fn position(&self, id: ConversationId) -> Option<usize> {
        self.conversations.iter().position(|c| c.id == id)
    }

    /// Durable records: conversations holding at least one message.
    fn record_count(&self) -> usize {
        self.conversations.iter().filter(|c| !c.is_empty()).count()
    }

    fn favorite_count(&self) -> usize {
        self.conversations.iter().filter(|c| c.favorite).count()
    }

    /// Least-recently-updated non-favorite record, the only legal eviction
    /// target.
    fn evict_candidate(&self) -> Option<usize> {
        self.conversations
            .iter()
            .enumerate()
            .rev()
            .find(|(_, c)| !c.favorite && !c.is_empty())
            .map(|(index, _)| index)
    }

    /// Move a conversation to the front, preserving recency order.
    fn promote(&mut self, index: usize) {
        let conversation = self.conversations.remove(index);
        self.conversations.insert(0, conversation);
    }
}

/// Bounded conversation store with favorite protection, one namespace per
/// mode.
pub struct ConversationRepository {
    limits: HistorySettings,
    store: Arc<dyn HistoryStore>,
    modes: HashMap<ConversationMode, Mutex<ModeNamespace>>,
}

impl ConversationRepository {
    /// Load every mode's history through the persistence port.
    ///
    /// A load failure is downgraded to a warning and an empty namespace: the
    /// in-memory state is authoritative for the session and the next
    /// successful save reconciles.
    pub async fn load(limits: HistorySettings, store: Arc<dyn HistoryStore>) -> Self {
        let mut modes = HashMap::new();
        for mode in ConversationMode::ALL {
            let mut conversations = match store.load(mode).await {
                Ok(conversations) => conversations,
                Err(err) => {
                    warn!(mode = %mode, error = %err, "History load failed; starting empty");
                    Vec::new()
                }
            };
            conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            modes.insert(mode, Mutex::new(ModeNamespace { conversations }));
        }
        Self {
            limits,
            store,
            modes,
        }
    }

    /// Namespaces exist for every mode from construction.
    fn namespace(&self, mode: ConversationMode) -> &Mutex<ModeNamespace> {
        self.modes
            .get(&mode)
            .unwrap_or_else(|| unreachable!("namespace missing for mode {mode}"))
    }

    /// Allocate a new empty conversation in the mode namespace.
    ///
    /// The conversation is listed immediately but not persisted until its
    /// first message, so empty sessions are never stored.
    ///
    /// # Errors
    /// Returns [`ChatError::ModeAtCapacity`] when the mode is full and every
    /// occupant is favorite-protected.
    pub async fn create(&self, mode: ConversationMode) -> ChatResult<Conversation> {
        let mut namespace = self.namespace(mode).lock().await;
        if namespace.record_count() >= self.limits.max_conversations
            && namespace.evict_candidate().is_none()
        {
            return Err(ChatError::ModeAtCapacity {
                max: self.limits.max_conversations,
            });
        }
        let conversation = Conversation::new(mode);
        info!(mode = %mode, id = %conversation.id, "Created conversation");
        namespace.conversations.insert(0, conversation.clone());
        Ok(conversation)
    }

    /// Append a message, deriving the title on the first user message and
    /// enforcing the capacity bound when the append turns the conversation
    /// into a durable record.
    ///
    /// # Errors
    /// [`ChatError::NotFound`] if the id is unknown;
    /// [`ChatError::ModeAtCapacity`] when a brand-new record cannot fit and
    /// nothing is evictable (no state changes in that case).
    pub async fn append_message(
        &self,
        id: ConversationId,
        message: ChatMessage,
    ) -> ChatResult<AppendOutcome> {
        for mode in ConversationMode::ALL {
            let mut namespace = self.namespace(mode).lock().await;
            let Some(index) = namespace.position(id) else {
                continue;
            };

            let was_draft = namespace.conversations[index].is_empty();
            if was_draft
                && namespace.record_count() >= self.limits.max_conversations
                && namespace.evict_candidate().is_none()
            {
                // Favorites may have been toggled since creation; re-check so
                // the capacity invariant holds after any sequence.
                return Err(ChatError::ModeAtCapacity {
                    max: self.limits.max_conversations,
                });
            }

            namespace.conversations[index].push_message(message);
            namespace.promote(index);

            let mut evicted = None;
            if was_draft {
                while namespace.record_count() > self.limits.max_conversations {
                    let Some(victim) = namespace.evict_candidate() else {
                        break;
                    };
                    let removed = namespace.conversations.remove(victim);
                    info!(mode = %mode, id = %removed.id, "Evicted conversation at capacity");
                    evicted = Some(removed.id);
                }
            }

            let conversation = namespace.conversations[0].clone();
            self.persist(mode, &namespace).await;
            return Ok(AppendOutcome {
                conversation,
                evicted,
            });
        }
        Err(ChatError::NotFound { id })
    }

    /// Toggle the favorite flag. Unmarking always succeeds.
    ///
    /// # Errors
    /// [`ChatError::FavoriteLimitReached`] when marking would exceed the
    /// per-mode favorite cap (the store is left unchanged);
    /// [`ChatError::NotFound`] if the id is unknown.
    pub async fn toggle_favorite(&self, id: ConversationId) -> ChatResult<Conversation> {
        for mode in ConversationMode::ALL {
            let mut namespace = self.namespace(mode).lock().await;
            let Some(index) = namespace.position(id) else {
                continue;
            };

            let turning_on = !namespace.conversations[index].favorite;
            if turning_on && namespace.favorite_count() >= self.limits.max_favorites {
                return Err(ChatError::FavoriteLimitReached {
                    max: self.limits.max_favorites,
                });
            }

            namespace.conversations[index].favorite = turning_on;
            namespace.conversations[index].touch();
            namespace.promote(index);

            let conversation = namespace.conversations[0].clone();
            self.persist(mode, &namespace).await;
            return Ok(conversation);
        }
        Err(ChatError::NotFound { id })
    }

    /// Atomically replace the last assistant message.
    ///
    /// # Errors
    /// [`ChatError::NoAssistantMessage`] if the conversation has none;
    /// [`ChatError::NotFound`] if the id is unknown.
    pub async fn regenerate_last(
        &self,
        id: ConversationId,
        text: impl Into<String>,
    ) -> ChatResult<Conversation> {
        let text = text.into();
        for mode in ConversationMode::ALL {
            let mut namespace = self.namespace(mode).lock().await;
            let Some(index) = namespace.position(id) else {
                continue;
            };

            let Some(last) = namespace.conversations[index].last_assistant_index() else {
                return Err(ChatError::NoAssistantMessage);
            };
            namespace.conversations[index].messages[last] = ChatMessage::assistant(text);
            namespace.conversations[index].touch();
            namespace.promote(index);

            let conversation = namespace.conversations[0].clone();
            self.persist(mode, &namespace).await;
            return Ok(conversation);
        }
        Err(ChatError::NotFound { id })
    }

    /// Remove a conversation regardless of its favorite status. Explicit
    /// user action, not subject to the eviction protection rule.
    ///
    /// # Errors
    /// [`ChatError::NotFound`] if the id is unknown.
    pub async fn delete(&self, id: ConversationId) -> ChatResult<()> {
        for mode in ConversationMode::ALL {
            let mut namespace = self.namespace(mode).lock().await;
            let Some(index) = namespace.position(id) else {
                continue;
            };
            let removed = namespace.conversations.remove(index);
            info!(mode = %mode, id = %removed.id, "Deleted conversation");
            self.persist(mode, &namespace).await;
            return Ok(());
        }
        Err(ChatError::NotFound { id })
    }

    /// All conversations in a mode, most-recently-updated first.
    pub async fn list(&self, mode: ConversationMode) -> Vec<Conversation> {
        self.namespace(mode).lock().await.conversations.clone()
    }

    /// Look up one conversation by id across every mode.
    ///
    /// # Errors
    /// [`ChatError::NotFound`] if the id is unknown.
    pub async fn get(&self, id: ConversationId) -> ChatResult<Conversation> {
        for mode in ConversationMode::ALL {
            let namespace = self.namespace(mode).lock().await;
            if let Some(index) = namespace.position(id) {
                return Ok(namespace.conversations[index].clone());
            }
        }
        Err(ChatError::NotFound { id })
    }

    /// Write-through save of a mode's durable records. Failures are logged
    /// and the in-memory state stays authoritative.
    async fn persist(&self, mode: ConversationMode, namespace: &ModeNamespace) {
        let snapshot: Vec<Conversation> = namespace
            .conversations
            .iter()
            .filter(|c| !c.is_empty())
            .cloned()
            .collect();
        if let Err(err) = self.store.save(mode, snapshot).await {
            warn!(mode = %mode, error = %err, "History save failed; keeping in-memory state");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::history::message::MessageRole;
    use crate::history::store::{MemoryHistoryStore, StoreFuture};

    use super::*;

    const MODE: ConversationMode = ConversationMode::Counseling;

    fn limits(max_conversations: usize, max_favorites: usize) -> HistorySettings {
        HistorySettings {
            max_conversations,
            max_favorites,
        }
    }

    async fn repository(
        settings: HistorySettings,
    ) -> (ConversationRepository, Arc<MemoryHistoryStore>) {
        let store = Arc::new(MemoryHistoryStore::new());
        let port: Arc<dyn HistoryStore> = store.clone();
        let repository = ConversationRepository::load(settings, port).await;
        (repository, store)
    }

    /// Create a conversation and make it durable with one user message.
    async fn seed(repository: &ConversationRepository, text: &str) -> ConversationId {
        let conversation = repository.create(MODE).await.unwrap();
        repository
            .append_message(conversation.id, ChatMessage::user(text))
            .await
            .unwrap();
        conversation.id
    }

    #[tokio::test]
    async fn test_append_sets_title_and_recency() {
        let (repository, _) = repository(limits(10, 5)).await;
        let first = seed(&repository, "first topic").await;
        let second = seed(&repository, "second topic").await;

        let listed = repository.list(MODE).await;
        assert_eq!(listed[0].id, second);
        assert_eq!(listed[1].id, first);
        assert_eq!(listed[1].title, "first topic");

        repository
            .append_message(first, ChatMessage::assistant("reply"))
            .await
            .unwrap();
        let listed = repository.list(MODE).await;
        assert_eq!(listed[0].id, first, "touched conversation moves to front");
    }

    #[tokio::test]
    async fn test_capacity_eviction_reports_the_victim() {
        let (repository, _) = repository(limits(3, 2)).await;
        let oldest = seed(&repository, "oldest").await;
        let _middle = seed(&repository, "middle").await;
        let _newest = seed(&repository, "newest").await;

        let fresh = repository.create(MODE).await.unwrap();
        let outcome = repository
            .append_message(fresh.id, ChatMessage::user("overflow"))
            .await
            .unwrap();

        assert_eq!(outcome.evicted, Some(oldest));
        let listed = repository.list(MODE).await;
        assert_eq!(listed.len(), 3);
        assert!(listed.iter().all(|c| c.id != oldest));
    }

    #[tokio::test]
    async fn test_sixty_one_conversations_keep_the_cap() {
        let settings = limits(60, 50);
        let (repository, _) = repository(settings).await;
        let mut first = None;
        for index in 0..60 {
            let id = seed(&repository, &format!("topic {index}")).await;
            first.get_or_insert(id);
        }

        let fresh = repository.create(MODE).await.unwrap();
        let outcome = repository
            .append_message(fresh.id, ChatMessage::user("one more"))
            .await
            .unwrap();

        assert_eq!(outcome.evicted, first, "the least-recently-updated goes");
        assert_eq!(repository.list(MODE).await.len(), 60);
    }

    #[tokio::test]
    async fn test_fifty_first_favorite_is_refused_at_product_limits() {
        let (repository, _) = repository(limits(60, 50)).await;
        for index in 0..50 {
            let id = seed(&repository, &format!("kept {index}")).await;
            repository.toggle_favorite(id).await.unwrap();
        }
        let extra = seed(&repository, "one too many").await;

        let result = repository.toggle_favorite(extra).await;
        assert!(matches!(
            result,
            Err(ChatError::FavoriteLimitReached { max: 50 })
        ));
        assert!(!repository.get(extra).await.unwrap().favorite);
    }

    #[tokio::test]
    async fn test_eviction_never_removes_a_favorite() {
        let (repository, _) = repository(limits(2, 2)).await;
        let protected = seed(&repository, "protected").await;
        repository.toggle_favorite(protected).await.unwrap();
        let disposable = seed(&repository, "disposable").await;
        // The favorite is now the least-recently-updated record; eviction
        // must still skip it and take the newer non-favorite.
        repository
            .append_message(disposable, ChatMessage::assistant("reply"))
            .await
            .unwrap();

        let fresh = repository.create(MODE).await.unwrap();
        let outcome = repository
            .append_message(fresh.id, ChatMessage::user("overflow"))
            .await
            .unwrap();

        assert_eq!(outcome.evicted, Some(disposable));
        assert!(
            repository.get(protected).await.is_ok(),
            "favorite survived eviction"
        );
    }

    #[tokio::test]
    async fn test_favorite_cap_is_enforced_without_state_change() {
        let (repository, _) = repository(limits(10, 2)).await;
        let first = seed(&repository, "a").await;
        let second = seed(&repository, "b").await;
        let third = seed(&repository, "c").await;
        repository.toggle_favorite(first).await.unwrap();
        repository.toggle_favorite(second).await.unwrap();

        let result = repository.toggle_favorite(third).await;
        assert!(matches!(
            result,
            Err(ChatError::FavoriteLimitReached { max: 2 })
        ));
        let conversation = repository.get(third).await.unwrap();
        assert!(!conversation.favorite, "failed toggle left state unchanged");
    }

    #[tokio::test]
    async fn test_unmarking_a_favorite_always_succeeds() {
        let (repository, _) = repository(limits(10, 1)).await;
        let id = seed(&repository, "a").await;
        repository.toggle_favorite(id).await.unwrap();

        let conversation = repository.toggle_favorite(id).await.unwrap();
        assert!(!conversation.favorite);
    }

    #[tokio::test]
    async fn test_create_refused_when_all_occupants_are_favorites() {
        let (repository, _) = repository(limits(2, 2)).await;
        for text in ["a", "b"] {
            let id = seed(&repository, text).await;
            repository.toggle_favorite(id).await.unwrap();
        }

        let result = repository.create(MODE).await;
        assert!(matches!(result, Err(ChatError::ModeAtCapacity { max: 2 })));
        assert_eq!(repository.list(MODE).await.len(), 2);
    }

    #[tokio::test]
    async fn test_first_append_refused_when_favorites_filled_up_after_create() {
        let (repository, _) = repository(limits(2, 2)).await;
        let first = seed(&repository, "a").await;
        repository.toggle_favorite(first).await.unwrap();
        let draft = repository.create(MODE).await.unwrap();
        // The remaining evictable slot turns favorite between create and
        // the first append.
        let second = seed(&repository, "b").await;
        repository.toggle_favorite(second).await.unwrap();

        let result = repository
            .append_message(draft.id, ChatMessage::user("late"))
            .await;
        assert!(matches!(result, Err(ChatError::ModeAtCapacity { max: 2 })));
        let draft_after = repository.get(draft.id).await.unwrap();
        assert!(draft_after.is_empty(), "refused append changed nothing");
    }

    #[tokio::test]
    async fn test_regenerate_replaces_only_the_last_assistant_message() {
        let (repository, _) = repository(limits(10, 5)).await;
        let id = seed(&repository, "hi").await;
        repository
            .append_message(id, ChatMessage::assistant("hello"))
            .await
            .unwrap();

        let conversation = repository.regenerate_last(id, "hello again").await.unwrap();

        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[0].content, "hi");
        assert_eq!(conversation.messages[1].content, "hello again");
        assert_eq!(conversation.messages[1].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn test_regenerate_without_assistant_fails() {
        let (repository, _) = repository(limits(10, 5)).await;
        let id = seed(&repository, "hi").await;

        let result = repository.regenerate_last(id, "anything").await;
        assert!(matches!(result, Err(ChatError::NoAssistantMessage)));
    }

    #[tokio::test]
    async fn test_delete_removes_a_favorite() {
        let (repository, _) = repository(limits(10, 5)).await;
        let id = seed(&repository, "keep?").await;
        repository.toggle_favorite(id).await.unwrap();

        repository.delete(id).await.unwrap();
        assert!(matches!(
            repository.get(id).await,
            Err(ChatError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let (repository, _) = repository(limits(10, 5)).await;
        let ghost = ConversationId::new();
        assert!(matches!(
            repository.get(ghost).await,
            Err(ChatError::NotFound { .. })
        ));
        assert!(matches!(
            repository.delete(ghost).await,
            Err(ChatError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_drafts_are_listed_but_never_persisted() {
        let (repository, store) = repository(limits(10, 5)).await;
        let draft = repository.create(MODE).await.unwrap();
        seed(&repository, "durable").await;

        let listed = repository.list(MODE).await;
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().any(|c| c.id == draft.id));

        let persisted = store.load(MODE).await.unwrap();
        assert_eq!(persisted.len(), 1, "the draft was not written through");
    }

    #[tokio::test]
    async fn test_load_failure_starts_empty() {
        struct BrokenStore;

        impl HistoryStore for BrokenStore {
            fn load(
                &self,
                _mode: ConversationMode,
            ) -> StoreFuture<'_, ChatResult<Vec<Conversation>>> {
                Box::pin(async { Err(ChatError::Persistence("disk on fire".to_string())) })
            }

            fn save(
                &self,
                _mode: ConversationMode,
                _conversations: Vec<Conversation>,
            ) -> StoreFuture<'_, ChatResult<()>> {
                Box::pin(async { Err(ChatError::Persistence("disk on fire".to_string())) })
            }
        }

        let repository = ConversationRepository::load(limits(10, 5), Arc::new(BrokenStore)).await;
        assert!(repository.list(MODE).await.is_empty());

        // Mutations keep working against the in-memory state.
        let id = seed(&repository, "still works").await;
        assert_eq!(repository.get(id).await.unwrap().title, "still works");
    }

    #[tokio::test]
    async fn test_reload_restores_saved_state() {
        let settings = limits(10, 5);
        let store = Arc::new(MemoryHistoryStore::new());
        let port: Arc<dyn HistoryStore> = store.clone();
        let repository = ConversationRepository::load(settings.clone(), port).await;
        let id = seed(&repository, "persisted").await;
        repository.toggle_favorite(id).await.unwrap();

        let port: Arc<dyn HistoryStore> = store.clone();
        let reloaded = ConversationRepository::load(settings, port).await;
        let conversation = reloaded.get(id).await.unwrap();
        assert!(conversation.favorite);
        assert_eq!(conversation.title, "persisted");
    }
}
