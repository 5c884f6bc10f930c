//! Control-layer orchestration surface.
//!
//! The only operations a control layer should call. Submitting operations
//! return immediately with a [`ReplyTicket`]; a background turn driver
//! forwards the fragment stream and commits the finished reply into the
//! repository before the terminal event is forwarded, so a caller that has
//! observed the terminal event always observes the committed history.
//! Repository commits happen only after a generation has fully terminated,
//! so no code path holds backend time and a repository lock together.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::errors::{ChatError, ChatResult};
use crate::generation::prompt::{build_chat_prompt, build_regenerate_prompt};
use crate::generation::scheduler::{
    EventReceiver, GenerationEvent, GenerationScheduler, RequestHandle,
};
use crate::history::conversation::Conversation;
use crate::history::message::{ChatMessage, MessageRole};
use crate::history::mode::ConversationMode;
use crate::history::repository::ConversationRepository;
use crate::ids::ConversationId;

/// How a finished generation is committed back into the repository.
#[derive(Clone, Copy, Debug)]
enum CommitKind {
    /// Append a fresh assistant message.
    Append,
    /// Replace the last assistant message in place.
    ReplaceLast,
}

/// Ticket returned by the submitting operations.
///
/// The caller observes the stream through `events` (ordered fragments
/// terminated by exactly one terminal event) and may cancel through
/// `handle`; it is never blocked on backend completion.
pub struct ReplyTicket {
    /// Conversation the reply belongs to.
    pub conversation_id: ConversationId,
    /// Conversation evicted to make room, if the send created a new record.
    pub evicted: Option<ConversationId>,
    /// Handle to observe request state and cancel.
    pub handle: RequestHandle,
    /// The reply stream.
    pub events: EventReceiver,
}

/// Orchestrates the repository and the scheduler: at most one active
/// generation per process, consistent store updates on completion.
pub struct ConversationService {
    config: AppConfig,
    repository: Arc<ConversationRepository>,
    scheduler: Arc<GenerationScheduler>,
}

impl ConversationService {
    /// Wire the service over an already-loaded repository and scheduler.
    #[must_use]
    pub fn new(
        config: AppConfig,
        repository: Arc<ConversationRepository>,
        scheduler: Arc<GenerationScheduler>,
    ) -> Self {
        Self {
            config,
            repository,
            scheduler,
        }
    }

    /// Append a user message (creating the conversation when no id is
    /// given) and queue a generation for the reply.
    ///
    /// On `Cancelled` or `Failed` the user message stays appended so no
    /// input is silently lost; [`Self::retry`] re-submits it.
    ///
    /// # Errors
    /// [`ChatError::NotFound`] for an unknown id,
    /// [`ChatError::ModeAtCapacity`] when a new conversation cannot fit,
    /// [`ChatError::SchedulerUnavailable`] after shutdown.
    pub async fn send_message(
        &self,
        mode: ConversationMode,
        conversation_id: Option<ConversationId>,
        text: impl Into<String>,
    ) -> ChatResult<ReplyTicket> {
        let text = text.into();
        let conversation = match conversation_id {
            Some(id) => self.repository.get(id).await?,
            None => self.repository.create(mode).await?,
        };
        let outcome = self
            .repository
            .append_message(conversation.id, ChatMessage::user(text))
            .await?;

        let prompt = build_chat_prompt(
            self.config.system_prompt(outcome.conversation.mode),
            &outcome.conversation.messages,
            self.config.llm.max_prompt_chars,
        );
        self.submit(
            outcome.conversation.id,
            prompt,
            CommitKind::Append,
            outcome.evicted,
        )
    }

    /// Replace the last assistant reply with a newly generated one.
    ///
    /// The prompt is re-derived from the history up to (not including) the
    /// last assistant message; on success the reply is swapped in place.
    ///
    /// # Errors
    /// [`ChatError::NoAssistantMessage`] when there is nothing to
    /// regenerate; [`ChatError::NotFound`] for an unknown id.
    pub async fn regenerate(&self, id: ConversationId) -> ChatResult<ReplyTicket> {
        let conversation = self.repository.get(id).await?;
        let prompt = build_regenerate_prompt(
            self.config.system_prompt(conversation.mode),
            &conversation.messages,
            self.config.llm.max_prompt_chars,
        )
        .ok_or(ChatError::NoAssistantMessage)?;
        self.submit(id, prompt, CommitKind::ReplaceLast, None)
    }

    /// Re-submit the same prompt after a failed or cancelled turn.
    ///
    /// # Errors
    /// [`ChatError::NothingToRetry`] unless the trailing message is the
    /// user input that got no reply; [`ChatError::NotFound`] for an unknown
    /// id.
    pub async fn retry(&self, id: ConversationId) -> ChatResult<ReplyTicket> {
        let conversation = self.repository.get(id).await?;
        match conversation.messages.last() {
            Some(message) if message.role == MessageRole::User => {}
            _ => return Err(ChatError::NothingToRetry),
        }
        let prompt = build_chat_prompt(
            self.config.system_prompt(conversation.mode),
            &conversation.messages,
            self.config.llm.max_prompt_chars,
        );
        self.submit(id, prompt, CommitKind::Append, None)
    }

    /// Prepare the process for work on `target`.
    ///
    /// In-flight generations for every other conversation are cancelled
    /// (the backend is global); a generation already running for the target
    /// is left untouched and its handle is returned so the caller can
    /// re-attach to the existing request.
    ///
    /// # Errors
    /// [`ChatError::NotFound`] if the target does not exist.
    pub async fn switch_conversation(
        &self,
        target: ConversationId,
    ) -> ChatResult<(Conversation, Option<RequestHandle>)> {
        let conversation = self.repository.get(target).await?;
        self.scheduler.cancel_except(target);
        debug!(conversation = %target, "Switched conversation");
        Ok((conversation, self.scheduler.active_for(target)))
    }

    /// Allocate a new empty conversation in the mode.
    ///
    /// # Errors
    /// [`ChatError::ModeAtCapacity`] when the mode is full of favorites.
    pub async fn new_conversation(&self, mode: ConversationMode) -> ChatResult<Conversation> {
        self.repository.create(mode).await
    }

    /// Toggle the favorite flag on a conversation.
    ///
    /// # Errors
    /// Propagates [`ChatError::FavoriteLimitReached`] and
    /// [`ChatError::NotFound`] from the repository.
    pub async fn toggle_favorite(&self, id: ConversationId) -> ChatResult<Conversation> {
        self.repository.toggle_favorite(id).await
    }

    /// Delete a conversation, cancelling its in-flight generation first.
    ///
    /// # Errors
    /// [`ChatError::NotFound`] for an unknown id.
    pub async fn delete_conversation(&self, id: ConversationId) -> ChatResult<()> {
        self.scheduler.cancel_for(id);
        self.repository.delete(id).await
    }

    /// All conversations in a mode, most-recently-updated first.
    pub async fn list(&self, mode: ConversationMode) -> Vec<Conversation> {
        self.repository.list(mode).await
    }

    /// Look up one conversation by id.
    ///
    /// # Errors
    /// [`ChatError::NotFound`] for an unknown id.
    pub async fn get(&self, id: ConversationId) -> ChatResult<Conversation> {
        self.repository.get(id).await
    }

    /// Queue the generation and spawn the turn driver.
    fn submit(
        &self,
        conversation_id: ConversationId,
        prompt: String,
        kind: CommitKind,
        evicted: Option<ConversationId>,
    ) -> ChatResult<ReplyTicket> {
        let (handle, events) = self.scheduler.submit(conversation_id, prompt)?;
        let (caller_sender, caller_receiver) = mpsc::unbounded_channel();
        let repository = Arc::clone(&self.repository);
        drop(tokio::spawn(drive_turn(
            repository,
            conversation_id,
            kind,
            events,
            caller_sender,
        )));
        Ok(ReplyTicket {
            conversation_id,
            evicted,
            handle,
            events: caller_receiver,
        })
    }
}

/// Forward the request's events to the caller, committing the finished
/// reply before the terminal event goes out.
async fn drive_turn(
    repository: Arc<ConversationRepository>,
    conversation_id: ConversationId,
    kind: CommitKind,
    mut events: EventReceiver,
    caller: mpsc::UnboundedSender<GenerationEvent>,
) {
    while let Some(event) = events.recv().await {
        if let GenerationEvent::Completed(text) = &event {
            commit(&repository, conversation_id, kind, text.clone()).await;
        }
        // The caller may have dropped its receiver; the commit above must
        // happen regardless, so send failures are ignored.
        let _ = caller.send(event);
    }
}

/// Commit the assembled reply into the repository.
async fn commit(
    repository: &ConversationRepository,
    conversation_id: ConversationId,
    kind: CommitKind,
    text: String,
) {
    let result = match kind {
        CommitKind::Append => repository
            .append_message(conversation_id, ChatMessage::assistant(text))
            .await
            .map(|_| ()),
        CommitKind::ReplaceLast => repository
            .regenerate_last(conversation_id, text)
            .await
            .map(|_| ()),
    };
    if let Err(err) = result {
        // The conversation may have been deleted mid-generation; the caller
        // still receives the streamed text.
        warn!(conversation = %conversation_id, error = %err, "Could not commit assistant reply");
    }
}
