use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use helpline_core::config::{LlmConfig, LlmProvider};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";
const RETRY_BASE_DELAY_MS: u64 = 500;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("llm request timed out after {0}s")]
    Timeout(u64),
    #[error("llm transport error: {0}")]
    Transport(String),
    #[error("llm returned status {0}")]
    Status(u16),
    #[error("llm response could not be decoded: {0}")]
    Decode(String),
    #[error("llm returned an empty completion")]
    Empty,
    #[error("llm client misconfigured: {0}")]
    Configuration(String),
}

impl LlmError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) => true,
            Self::Status(code) => *code == 429 || *code >= 500,
            Self::Decode(_) | Self::Empty | Self::Configuration(_) => false,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Gemini `generateContent` or Ollama `/api/generate`, picked from config.
pub struct HttpLlmClient {
    client: reqwest::Client,
    provider: LlmProvider,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    timeout: Duration,
    max_retries: u32,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| LlmError::Configuration(error.to_string()))?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| match config.provider {
                LlmProvider::Gemini => GEMINI_BASE_URL.to_string(),
                LlmProvider::Ollama => OLLAMA_BASE_URL.to_string(),
            })
            .trim_end_matches('/')
            .to_string();

        if config.provider == LlmProvider::Gemini && config.api_key.is_none() {
            return Err(LlmError::Configuration("gemini requires an api key".to_string()));
        }

        Ok(Self {
            client,
            provider: config.provider,
            base_url,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            timeout,
            max_retries: config.max_retries,
        })
    }

    async fn attempt(&self, prompt: &str) -> Result<String, LlmError> {
        let request = match self.provider {
            LlmProvider::Gemini => {
                let mut request = self
                    .client
                    .post(format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model))
                    .json(&GeminiRequest::new(prompt));
                if let Some(key) = &self.api_key {
                    request = request.header("x-goog-api-key", key.expose_secret());
                }
                request
            }
            LlmProvider::Ollama => self.client.post(format!("{}/api/generate", self.base_url)).json(
                &OllamaRequest { model: &self.model, prompt, stream: false },
            ),
        };

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                LlmError::Timeout(self.timeout.as_secs())
            } else {
                LlmError::Transport(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Status(status.as_u16()));
        }

        let payload: Value =
            response.json().await.map_err(|error| LlmError::Decode(error.to_string()))?;
        let text = match self.provider {
            LlmProvider::Gemini => extract_gemini_text(&payload),
            LlmProvider::Ollama => extract_ollama_text(&payload),
        };
        text.filter(|text| !text.trim().is_empty()).ok_or(LlmError::Empty)
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let mut attempt = 0_u32;
        loop {
            match self.attempt(prompt).await {
                Ok(text) => return Ok(text),
                Err(error) if error.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = RETRY_BASE_DELAY_MS.saturating_mul(1_u64 << attempt.min(6));
                    warn!(
                        event_name = "llm.request.retry",
                        provider = self.provider.as_str(),
                        attempt,
                        retry_in_ms = delay,
                        error = %error,
                        "retrying llm request"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

impl<'a> GeminiRequest<'a> {
    fn new(prompt: &'a str) -> Self {
        Self { contents: vec![GeminiContent { parts: vec![GeminiPart { text: prompt }] }] }
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: Option<String>,
}

fn extract_gemini_text(payload: &Value) -> Option<String> {
    let parts = payload
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts.iter().filter_map(|part| part.get("text")?.as_str()).collect();
    Some(text)
}

fn extract_ollama_text(payload: &Value) -> Option<String> {
    serde_json::from_value::<OllamaResponse>(payload.clone()).ok()?.response
}
