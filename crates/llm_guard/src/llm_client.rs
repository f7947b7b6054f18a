//! LLM backend client for incident analysis.
//!
//! Generic seam for the one external call the pipeline makes. Supports
//! Ollama-style and OpenAI-compatible endpoints, and a fake client for
//! tests. The governed call path is synchronous; async callers wrap the
//! pipeline in `spawn_blocking`.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// LLM endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmBackendConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.2:3b".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_tokens() -> u32 {
    2000
}

impl Default for LlmBackendConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// LLM call errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("LLM is disabled in configuration")]
    Disabled,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),

    #[error("LLM returned empty response")]
    EmptyResponse,
}

/// Raw model output plus observed token usage.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl LlmResponse {
    /// Response with usage estimated at ~4 chars per token, for backends
    /// that do not report counts.
    pub fn with_estimated_usage(prompt: &str, text: String) -> Self {
        Self {
            input_tokens: estimate_tokens(prompt),
            output_tokens: estimate_tokens(&text),
            text,
        }
    }
}

/// Rough token estimate when the backend reports no usage: one token per
/// four characters, counted as characters rather than bytes so non-ASCII
/// text is not overestimated.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64 / 4).max(1)
}

/// The external collaborator the pipeline calls with a sanitized prompt.
pub trait LlmClient: Send + Sync {
    fn analyze(&self, prompt: &str) -> Result<LlmResponse, LlmError>;
}

impl<T: LlmClient + ?Sized> LlmClient for std::sync::Arc<T> {
    fn analyze(&self, prompt: &str) -> Result<LlmResponse, LlmError> {
        (**self).analyze(prompt)
    }
}

/// HTTP client speaking Ollama-style and OpenAI-compatible APIs.
pub struct HttpLlmClient {
    config: LlmBackendConfig,
    client: reqwest::blocking::Client,
}

impl HttpLlmClient {
    pub fn new(config: LlmBackendConfig) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    fn is_ollama_endpoint(&self) -> bool {
        self.config.endpoint.contains("11434") || self.config.endpoint.contains("ollama")
    }

    fn map_send_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout(self.config.timeout_secs)
        } else {
            LlmError::Http(format!("Request failed: {e}"))
        }
    }

    fn call_ollama(&self, prompt: &str) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/api/generate", self.config.endpoint);
        let body = serde_json::json!({
            "model": self.config.model,
            "prompt": prompt,
            "stream": false,
            "format": "json",
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(LlmError::Http(format!("HTTP {} from Ollama", response.status())));
        }

        let json: serde_json::Value = response
            .json()
            .map_err(|e| LlmError::MalformedResponse(format!("Failed to parse response: {e}")))?;

        let text = json
            .get("response")
            .and_then(|v| v.as_str())
            .ok_or(LlmError::EmptyResponse)?
            .to_string();

        // Ollama reports usage as eval counts.
        let input_tokens = json
            .get("prompt_eval_count")
            .and_then(|v| v.as_u64())
            .unwrap_or_else(|| estimate_tokens(prompt));
        let output_tokens = json
            .get("eval_count")
            .and_then(|v| v.as_u64())
            .unwrap_or_else(|| estimate_tokens(&text));

        Ok(LlmResponse {
            text,
            input_tokens,
            output_tokens,
        })
    }

    fn call_openai_compatible(&self, prompt: &str) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/v1/chat/completions", self.config.endpoint);
        let body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": [
                {"role": "user", "content": prompt},
            ],
            "response_format": {"type": "json_object"},
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(LlmError::Http(format!(
                "HTTP {} from OpenAI-compatible API",
                response.status()
            )));
        }

        let json: serde_json::Value = response
            .json()
            .map_err(|e| LlmError::MalformedResponse(format!("Failed to parse response: {e}")))?;

        let text = json
            .get("choices")
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("message"))
            .and_then(|v| v.get("content"))
            .and_then(|v| v.as_str())
            .ok_or(LlmError::EmptyResponse)?
            .to_string();

        let usage = json.get("usage");
        let input_tokens = usage
            .and_then(|u| u.get("prompt_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or_else(|| estimate_tokens(prompt));
        let output_tokens = usage
            .and_then(|u| u.get("completion_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or_else(|| estimate_tokens(&text));

        Ok(LlmResponse {
            text,
            input_tokens,
            output_tokens,
        })
    }
}

/// A timeout already consumed the whole configured deadline; trying the
/// other protocol would double it. Only protocol-level failures warrant the
/// OpenAI-compatible fallback.
fn fall_through_to_openai(error: &LlmError) -> bool {
    !matches!(error, LlmError::Timeout(_))
}

impl LlmClient for HttpLlmClient {
    fn analyze(&self, prompt: &str) -> Result<LlmResponse, LlmError> {
        if !self.config.enabled {
            return Err(LlmError::Disabled);
        }

        if self.is_ollama_endpoint() {
            match self.call_ollama(prompt) {
                Ok(response) => return Ok(response),
                Err(e) if fall_through_to_openai(&e) => {
                    debug!("Ollama API failed, trying OpenAI-compatible: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        self.call_openai_compatible(prompt)
    }
}

/// Fake client returning queued responses, for tests.
pub struct FakeLlmClient {
    responses: std::sync::Mutex<Vec<Result<LlmResponse, LlmError>>>,
    call_count: std::sync::Mutex<usize>,
}

impl FakeLlmClient {
    pub fn new(responses: Vec<Result<LlmResponse, LlmError>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
            call_count: std::sync::Mutex::new(0),
        }
    }

    /// Fake client that always returns the given body with fixed usage.
    pub fn always(text: impl Into<String>, input_tokens: u64, output_tokens: u64) -> Self {
        Self::new(vec![Ok(LlmResponse {
            text: text.into(),
            input_tokens,
            output_tokens,
        })])
    }

    pub fn always_error(error: LlmError) -> Self {
        Self::new(vec![Err(error)])
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

impl LlmClient for FakeLlmClient {
    fn analyze(&self, _prompt: &str) -> Result<LlmResponse, LlmError> {
        *self.call_count.lock().unwrap() += 1;

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        if responses.len() == 1 {
            responses[0].clone()
        } else {
            responses.remove(0)
        }
    }
}
