//! Streaming Ollama client implementing the inference backend boundary.
//!
//! Behaviour:
//! - Probe `/api/version` to check whether the server is reachable.
//! - Generate via `POST /api/generate` with `stream: true`, reading the
//!   NDJSON response line by line and forwarding each chunk as a fragment.
//! - Check the cancel token between chunks; stopping is cooperative, so a
//!   cancel takes effect at the next chunk boundary.

use std::io::{BufRead, BufReader};
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::LlmSettings;

use super::backend::{BackendError, InferenceBackend};

/// HTTP connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime options forwarded to Ollama per request.
#[derive(Serialize)]
struct GenerateOptions {
    num_ctx: u32,
    num_predict: u32,
    temperature: f64,
    top_p: f64,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

/// One NDJSON line of a streaming generate response.
#[derive(Deserialize)]
struct GenerateChunk {
    response: Option<String>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

/// Blocking Ollama client streaming fragments from `/api/generate`.
pub struct OllamaBackend {
    client: Client,
    settings: LlmSettings,
}

impl OllamaBackend {
    /// Build a client for the configured Ollama endpoint.
    ///
    /// # Errors
    /// Returns [`BackendError::Unavailable`] if the HTTP client cannot be
    /// built.
    pub fn new(settings: LlmSettings) -> Result<Self, BackendError> {
        // No overall request deadline: generations are long-running and
        // stopping is the cancel token's job.
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None)
            .build()
            .map_err(|err| BackendError::Unavailable(err.to_string()))?;
        Ok(Self { client, settings })
    }

    /// Probe `/api/version` to check whether the server is reachable.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        let url = format!("{}/api/version", self.settings.base_url);
        self.client
            .get(&url)
            .timeout(CONNECT_TIMEOUT)
            .send()
            .map(|response| response.status().is_success())
            .unwrap_or(false)
    }
}

impl InferenceBackend for OllamaBackend {
    fn generate(
        &self,
        prompt: &str,
        on_token: &mut dyn FnMut(&str) -> bool,
        cancel: &CancellationToken,
    ) -> Result<String, BackendError> {
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }

        let request = GenerateRequest {
            model: &self.settings.model,
            prompt,
            stream: true,
            options: GenerateOptions {
                num_ctx: self.settings.max_context_tokens,
                num_predict: self.settings.max_response_tokens,
                temperature: self.settings.temperature,
                top_p: self.settings.top_p,
            },
        };

        let url = format!("{}/api/generate", self.settings.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .map_err(|err| BackendError::Unavailable(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Generation(format!(
                "ollama returned http status {status}"
            )));
        }

        let mut assembled = String::new();
        let reader = BufReader::new(response);
        for line in reader.lines() {
            if cancel.is_cancelled() {
                return Err(BackendError::Cancelled);
            }
            let line = line.map_err(|err| BackendError::Generation(err.to_string()))?;
            let Some(chunk) = parse_chunk(&line)? else {
                continue;
            };
            if let Some(error) = chunk.error {
                return Err(BackendError::Generation(error));
            }
            if let Some(fragment) = chunk.response {
                if !fragment.is_empty() {
                    assembled.push_str(&fragment);
                    if !on_token(&fragment) {
                        return Err(BackendError::Cancelled);
                    }
                }
            }
            if chunk.done {
                break;
            }
        }

        debug!(
            model = %self.settings.model,
            chars = assembled.len(),
            "Generation finished"
        );
        Ok(assembled)
    }
}

/// Parse one NDJSON line; blank lines yield `None`.
fn parse_chunk(line: &str) -> Result<Option<GenerateChunk>, BackendError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|err| BackendError::Generation(format!("malformed stream chunk: {err}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chunk_reads_fragment() {
        let chunk = parse_chunk(r#"{"response":"こんに","done":false}"#)
            .unwrap()
            .unwrap();
        assert_eq!(chunk.response.as_deref(), Some("こんに"));
        assert!(!chunk.done);
    }

    #[test]
    fn test_parse_chunk_reads_done_marker() {
        let chunk = parse_chunk(r#"{"done":true}"#).unwrap().unwrap();
        assert!(chunk.done);
        assert!(chunk.response.is_none());
    }

    #[test]
    fn test_parse_chunk_reads_server_error() {
        let chunk = parse_chunk(r#"{"error":"model not found"}"#).unwrap().unwrap();
        assert_eq!(chunk.error.as_deref(), Some("model not found"));
    }

    #[test]
    fn test_parse_chunk_skips_blank_lines() {
        assert!(parse_chunk("   ").unwrap().is_none());
        assert!(parse_chunk("").unwrap().is_none());
    }

    #[test]
    fn test_parse_chunk_rejects_garbage() {
        assert!(parse_chunk("{ not json").is_err());
    }

    #[test]
    fn test_request_body_carries_runtime_options() {
        let settings = LlmSettings::default();
        let request = GenerateRequest {
            model: &settings.model,
            prompt: "hello",
            stream: true,
            options: GenerateOptions {
                num_ctx: settings.max_context_tokens,
                num_predict: settings.max_response_tokens,
                temperature: settings.temperature,
                top_p: settings.top_p,
            },
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["stream"], serde_json::json!(true));
        assert_eq!(value["options"]["num_ctx"], serde_json::json!(4096));
        assert_eq!(value["options"]["num_predict"], serde_json::json!(512));
    }
}
