//! Startup helpers for the Mind-Chat console binary.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AppConfig;
use crate::errors::ChatResult;
use crate::generation::backend::InferenceBackend;
use crate::generation::ollama::OllamaBackend;
use crate::generation::scheduler::GenerationScheduler;
use crate::history::conversation::Conversation;
use crate::history::mode::ConversationMode;
use crate::history::repository::ConversationRepository;
use crate::history::store::JsonHistoryStore;
use crate::service::ConversationService;

/// Fully wired application context.
pub struct AppContext {
    /// Effective configuration.
    pub config: AppConfig,
    /// Conversation repository, loaded from disk.
    pub repository: Arc<ConversationRepository>,
    /// Generation scheduler over the local backend.
    pub scheduler: Arc<GenerationScheduler>,
    /// Orchestration surface.
    pub service: Arc<ConversationService>,
}

/// Initialize tracing from the environment with an INFO default.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();
}

/// Build the full application context from environment configuration.
///
/// # Errors
/// Returns an error if the configuration is invalid, the data directory
/// cannot be prepared, or the backend client cannot be built.
pub async fn build_context() -> ChatResult<AppContext> {
    let config = AppConfig::from_env();
    config.validate()?;

    let store = Arc::new(JsonHistoryStore::new(&config.data_dir)?);
    let repository = Arc::new(ConversationRepository::load(config.history.clone(), store).await);

    let backend = OllamaBackend::new(config.llm.clone())
        .map_err(|err| crate::errors::ChatError::BackendUnavailable(err.to_string()))?;
    if !backend.is_ready() {
        warn!(
            url = %config.llm.base_url,
            "Ollama is not reachable; generations will fail until it is started"
        );
    }
    let backend: Arc<dyn InferenceBackend> = Arc::new(backend);

    let scheduler = Arc::new(GenerationScheduler::new(backend));
    let service = Arc::new(ConversationService::new(
        config.clone(),
        Arc::clone(&repository),
        Arc::clone(&scheduler),
    ));

    info!(
        data_dir = %config.data_dir.display(),
        model = %config.llm.model,
        "Mind-Chat core ready"
    );
    Ok(AppContext {
        config,
        repository,
        scheduler,
        service,
    })
}

/// Pick the conversation the console opens on: the most recently updated
/// one in the mode, or a fresh one when the history is empty.
///
/// # Errors
/// Propagates [`crate::errors::ChatError::ModeAtCapacity`] from creation.
pub async fn bootstrap_conversation(
    service: &ConversationService,
    mode: ConversationMode,
) -> ChatResult<Conversation> {
    if let Some(conversation) = service.list(mode).await.into_iter().next() {
        return Ok(conversation);
    }
    service.new_conversation(mode).await
}
