//! Single-consumer generation scheduler.
//!
//! The inference backend is a singleton, non-reentrant resource. All access
//! is funneled through one FIFO queue drained by a single worker task; the
//! backend handle never leaves that task, so exactly one request is running
//! at any instant process-wide. Each request carries its own cancellation
//! token and event channel: zero or more fragments followed by exactly one
//! terminal event. Cancelling a queued request guarantees it never runs;
//! cancelling a running request stops fragment delivery no later than the
//! terminal `Cancelled` event.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{ChatError, ChatResult};
use crate::ids::{ConversationId, RequestId};

use super::backend::{BackendError, InferenceBackend};

/// Lifecycle state of a generation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    /// Accepted and waiting for the backend to become free.
    Queued,
    /// The backend is actively producing output for this request.
    Running,
    /// The backend finished and the final text was delivered.
    Completed,
    /// The request was cancelled before or during execution.
    Cancelled,
    /// The backend reported a fault.
    Failed,
}

impl RequestState {
    /// Whether the state is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// One event on a request's stream. Zero or more `Fragment`s are followed by
/// exactly one terminal event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GenerationEvent {
    /// A streamed fragment of the reply.
    Fragment(String),
    /// The backend finished; carries the assembled reply text.
    Completed(String),
    /// The request was cancelled. Fragments already delivered stay valid.
    Cancelled,
    /// The backend failed with the given reason.
    Failed(String),
}

impl GenerationEvent {
    /// Whether this event terminates the stream.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Fragment(_))
    }
}

/// Receiving half of a request's event stream.
pub type EventReceiver = mpsc::UnboundedReceiver<GenerationEvent>;

/// Handle to observe and cancel a submitted request.
#[derive(Clone, Debug)]
pub struct RequestHandle {
    id: RequestId,
    conversation_id: ConversationId,
    cancel: CancellationToken,
    state: watch::Receiver<RequestState>,
}

impl RequestHandle {
    /// Request identifier.
    #[must_use]
    pub const fn id(&self) -> RequestId {
        self.id
    }

    /// Conversation this request belongs to.
    #[must_use]
    pub const fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Current request state.
    #[must_use]
    pub fn state(&self) -> RequestState {
        *self.state.borrow()
    }

    /// Ask the scheduler to stop this request as soon as possible.
    ///
    /// Idempotent; a no-op once the request is terminal.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait until the request reaches a terminal state.
    pub async fn terminal_state(&mut self) -> RequestState {
        loop {
            let state = *self.state.borrow_and_update();
            if state.is_terminal() {
                return state;
            }
            if self.state.changed().await.is_err() {
                // The worker dropped the sender; the last value is final.
                return *self.state.borrow();
            }
        }
    }
}

/// One queued unit of work for the worker.
struct GenerationJob {
    id: RequestId,
    conversation_id: ConversationId,
    prompt: String,
    events: mpsc::UnboundedSender<GenerationEvent>,
    cancel: CancellationToken,
    state: watch::Sender<RequestState>,
}

/// Serializes inference calls against the single backend.
pub struct GenerationScheduler {
    queue: mpsc::UnboundedSender<GenerationJob>,
    active: Arc<DashMap<ConversationId, RequestHandle>>,
    shutdown: CancellationToken,
}

impl GenerationScheduler {
    /// Spawn the worker task that owns the backend exclusively.
    #[must_use]
    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        let active = Arc::new(DashMap::new());
        let shutdown = CancellationToken::new();
        drop(tokio::spawn(run_worker(
            backend,
            receiver,
            Arc::clone(&active),
            shutdown.clone(),
        )));
        Self {
            queue,
            active,
            shutdown,
        }
    }

    /// Enqueue a generation for `conversation_id`.
    ///
    /// A prior request still queued or running for the same conversation is
    /// cancelled first (one active generation per conversation). Requests
    /// for other conversations wait their turn in submission order and are
    /// never cancelled by this call.
    ///
    /// # Errors
    /// [`ChatError::SchedulerUnavailable`] after shutdown.
    pub fn submit(
        &self,
        conversation_id: ConversationId,
        prompt: String,
    ) -> ChatResult<(RequestHandle, EventReceiver)> {
        if let Some(prior) = self.active.get(&conversation_id) {
            debug!(
                request = %prior.value().id(),
                conversation = %conversation_id,
                "Cancelling superseded request"
            );
            prior.value().cancel();
        }

        let id = RequestId::new();
        let cancel = self.shutdown.child_token();
        let (state_sender, state_receiver) = watch::channel(RequestState::Queued);
        let (event_sender, event_receiver) = mpsc::unbounded_channel();

        let handle = RequestHandle {
            id,
            conversation_id,
            cancel: cancel.clone(),
            state: state_receiver,
        };
        let job = GenerationJob {
            id,
            conversation_id,
            prompt,
            events: event_sender,
            cancel,
            state: state_sender,
        };

        self.queue
            .send(job)
            .map_err(|_| ChatError::SchedulerUnavailable)?;
        self.active.insert(conversation_id, handle.clone());
        info!(request = %id, conversation = %conversation_id, "Queued generation");
        Ok((handle, event_receiver))
    }

    /// Handle of the live (queued or running) request for a conversation.
    #[must_use]
    pub fn active_for(&self, conversation_id: ConversationId) -> Option<RequestHandle> {
        self.active
            .get(&conversation_id)
            .map(|entry| entry.value().clone())
    }

    /// Cancel the live request for a conversation, if any. Idempotent.
    pub fn cancel_for(&self, conversation_id: ConversationId) {
        if let Some(handle) = self.active_for(conversation_id) {
            handle.cancel();
        }
    }

    /// Cancel every live request except the given conversation's.
    pub fn cancel_except(&self, conversation_id: ConversationId) {
        for entry in self.active.iter() {
            if *entry.key() != conversation_id {
                entry.value().cancel();
            }
        }
    }

    /// Stop the worker. Queued and running requests terminate as cancelled.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Terminal outcome of one backend call.
enum Outcome {
    Completed(String),
    Cancelled,
    Failed(String),
}

/// Worker loop. Exactly one request executes at any instant; the backend
/// handle never leaves this task.
async fn run_worker(
    backend: Arc<dyn InferenceBackend>,
    mut queue: mpsc::UnboundedReceiver<GenerationJob>,
    active: Arc<DashMap<ConversationId, RequestHandle>>,
    shutdown: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            () = shutdown.cancelled() => break,
            job = queue.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        let outcome = execute(Arc::clone(&backend), &job).await;
        finish(&job, outcome, &active);
    }

    // Drain whatever was still queued so every request gets its one
    // terminal event.
    queue.close();
    while let Ok(job) = queue.try_recv() {
        finish(&job, Outcome::Cancelled, &active);
    }
    info!("Generation worker stopped");
}

/// Run one backend call for a job.
async fn execute(backend: Arc<dyn InferenceBackend>, job: &GenerationJob) -> Outcome {
    if job.cancel.is_cancelled() {
        // Cancelled while queued: must never transition to Running.
        return Outcome::Cancelled;
    }
    let _ = job.state.send(RequestState::Running);
    debug!(request = %job.id, "Request running");

    let prompt = job.prompt.clone();
    let cancel = job.cancel.clone();
    let sink_cancel = job.cancel.clone();
    let events = job.events.clone();
    let result = tokio::task::spawn_blocking(move || {
        let mut forward = move |fragment: &str| {
            // No fragment may be delivered once the cancel is observed.
            if sink_cancel.is_cancelled() {
                return false;
            }
            events
                .send(GenerationEvent::Fragment(fragment.to_string()))
                .is_ok()
        };
        backend.generate(&prompt, &mut forward, &cancel)
    })
    .await;

    match result {
        Ok(Ok(text)) => {
            if job.cancel.is_cancelled() {
                // A cancel that raced completion still wins: the caller
                // asked for no reply.
                Outcome::Cancelled
            } else {
                Outcome::Completed(text)
            }
        }
        Ok(Err(BackendError::Cancelled)) => Outcome::Cancelled,
        Ok(Err(BackendError::Unavailable(reason))) => {
            Outcome::Failed(format!("backend unavailable: {reason}"))
        }
        Ok(Err(BackendError::Generation(reason))) => Outcome::Failed(reason),
        Err(err) => Outcome::Failed(format!("backend task aborted: {err}")),
    }
}

/// Publish the terminal state and event, then release the conversation slot.
fn finish(
    job: &GenerationJob,
    outcome: Outcome,
    active: &DashMap<ConversationId, RequestHandle>,
) {
    let (state, event) = match outcome {
        Outcome::Completed(text) => (RequestState::Completed, GenerationEvent::Completed(text)),
        Outcome::Cancelled => (RequestState::Cancelled, GenerationEvent::Cancelled),
        Outcome::Failed(reason) => {
            warn!(request = %job.id, reason = %reason, "Generation failed");
            (RequestState::Failed, GenerationEvent::Failed(reason))
        }
    };
    let _ = job.state.send(state);
    let _ = job.events.send(event);
    // Only the request that still owns the slot clears it: a newer request
    // for the same conversation may have replaced this one already.
    active.remove_if(&job.conversation_id, |_, handle| handle.id() == job.id);
    debug!(request = %job.id, state = ?state, "Request finished");
}
