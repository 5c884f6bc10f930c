//! Configuration for the Mind-Chat core.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{ChatError, ChatResult};
use crate::history::mode::ConversationMode;

/// Environment variable overriding the data directory.
const DATA_DIR_ENV: &str = "MINDCHAT_DATA_DIR";
/// Environment variable overriding the Ollama base URL
/// (e.g., "http://127.0.0.1:11434").
const OLLAMA_URL_ENV: &str = "MINDCHAT_OLLAMA_URL";
/// Environment variable overriding the completion model name.
const MODEL_ENV: &str = "MINDCHAT_MODEL";

/// Default Ollama endpoint on the local machine.
const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Top-level configuration for the Mind-Chat core.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding one history record file per mode.
    pub data_dir: PathBuf,
    /// History capacity settings, applied per mode.
    pub history: HistorySettings,
    /// Completion model settings.
    pub llm: LlmSettings,
    /// Per-mode system prompts.
    pub prompts: ModePrompts,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            history: HistorySettings::default(),
            llm: LlmSettings::default(),
            prompts: ModePrompts::default(),
        }
    }
}

impl AppConfig {
    /// Build the configuration from defaults plus `MINDCHAT_*` environment
    /// overrides.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(url) = std::env::var(OLLAMA_URL_ENV) {
            config.llm.base_url = url;
        }
        if let Ok(model) = std::env::var(MODEL_ENV) {
            config.llm.model = model;
        }
        config
    }

    /// System prompt owned by the given mode.
    #[must_use]
    pub fn system_prompt(&self, mode: ConversationMode) -> &str {
        self.prompts.for_mode(mode)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ChatResult<()> {
        self.history.validate()?;
        self.llm.validate()
    }
}

/// History capacity settings, applied per mode.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistorySettings {
    /// Maximum conversations kept per mode before eviction.
    pub max_conversations: usize,
    /// Maximum favorite conversations per mode.
    pub max_favorites: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            max_conversations: 60,
            max_favorites: 50,
        }
    }
}

impl HistorySettings {
    /// Validate capacity invariants.
    ///
    /// # Errors
    /// Returns an error if a cap is zero or the favorite cap exceeds the
    /// conversation cap.
    pub fn validate(&self) -> ChatResult<()> {
        if self.max_conversations == 0 {
            return Err(ChatError::InvalidConfig(
                "history.max_conversations must be > 0".to_string(),
            ));
        }
        if self.max_favorites == 0 {
            return Err(ChatError::InvalidConfig(
                "history.max_favorites must be > 0".to_string(),
            ));
        }
        if self.max_favorites > self.max_conversations {
            return Err(ChatError::InvalidConfig(
                "history.max_favorites must not exceed history.max_conversations".to_string(),
            ));
        }
        Ok(())
    }
}

/// Completion model settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Model name as installed in the local runtime.
    pub model: String,
    /// Base URL of the Ollama server.
    pub base_url: String,
    /// Context window in tokens.
    pub max_context_tokens: u32,
    /// Token budget for one reply.
    pub max_response_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
    /// Nucleus sampling threshold.
    pub top_p: f64,
    /// Character budget for an assembled prompt; oldest turns are dropped
    /// first when the transcript exceeds it.
    pub max_prompt_chars: usize,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "gemma2:2b-instruct-q8_0".to_string(),
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            max_context_tokens: 4096,
            max_response_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
            max_prompt_chars: 12_000,
        }
    }
}

impl LlmSettings {
    /// Validate model settings.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ChatResult<()> {
        if self.model.trim().is_empty() {
            return Err(ChatError::InvalidConfig(
                "llm.model must not be empty".to_string(),
            ));
        }
        if self.base_url.trim().is_empty() {
            return Err(ChatError::InvalidConfig(
                "llm.base_url must not be empty".to_string(),
            ));
        }
        if self.max_response_tokens == 0 {
            return Err(ChatError::InvalidConfig(
                "llm.max_response_tokens must be > 0".to_string(),
            ));
        }
        if self.max_prompt_chars == 0 {
            return Err(ChatError::InvalidConfig(
                "llm.max_prompt_chars must be > 0".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ChatError::InvalidConfig(
                "llm.temperature must be within 0.0..=2.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(ChatError::InvalidConfig(
                "llm.top_p must be within 0.0..=1.0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-mode system prompts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModePrompts {
    /// Counseling mode: empathetic, advice-oriented Japanese counselor.
    pub counseling: String,
    /// Casual mode: light small talk without the counseling framing.
    pub casual: String,
}

impl Default for ModePrompts {
    fn default() -> Self {
        Self {
            counseling: "あなたは丁寧で共感力のある悩み相談カウンセラーです。\
                相手の気持ちを尊重し、安心して話してもらえるように、\
                短すぎず長すぎない自然な日本語で、具体的な気づきや次の一歩を提案してください。\
                アドバイスが難しい場合は、相手の気持ちを受け止める言葉を最優先にしてください。"
                .to_string(),
            casual: "あなたは気さくで話しやすい雑談相手です。\
                肩の力を抜いた自然な日本語で、相手のペースに合わせて会話を続けてください。"
                .to_string(),
        }
    }
}

impl ModePrompts {
    /// System prompt for the given mode.
    #[must_use]
    pub fn for_mode(&self, mode: ConversationMode) -> &str {
        match mode {
            ConversationMode::Counseling => &self.counseling,
            ConversationMode::Casual => &self.casual,
        }
    }
}
