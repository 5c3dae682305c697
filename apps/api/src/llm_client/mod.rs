/// LLM Client: the single point of entry for all generative-text calls in Drafter.
///
/// ARCHITECTURAL RULE: No other module may call the Anthropic API directly.
/// All LLM interactions MUST go through the `TextGenerator` trait.
///
/// The client performs exactly one HTTP exchange per call. Retries, JSON recovery
/// and schema validation are layered on top by `crate::resilience`.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::HeaderMap, Client};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub mod prompts;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The model used for all LLM calls in Drafter.
/// This is intentionally hardcoded to prevent accidental drift.
pub const MODEL: &str = "claude-sonnet-4-5";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Failure surfaced by the external generative service.
///
/// `status` is absent for transport-level failures (DNS, reset, timeout).
/// `retry_after` is the server-provided wait hint, when one was sent.
#[derive(Debug, Clone, Error)]
#[error("{}", display_service_error(.status, .message))]
pub struct ServiceError {
    pub status: Option<u16>,
    pub message: String,
    pub retry_after: Option<Duration>,
}

fn display_service_error(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("service returned {code}: {message}"),
        None => message.to_string(),
    }
}

impl ServiceError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        let message = if e.is_timeout() {
            format!("request timed out: {e}")
        } else if e.is_connect() {
            format!("connection failed: {e}")
        } else {
            e.to_string()
        };
        ServiceError::new(e.status().map(|s| s.as_u16()), message)
    }
}

/// Sampling parameters forwarded to the model.
#[derive(Debug, Clone, Copy)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: 0.7,
        }
    }
}

/// The black-box generative text collaborator: returns raw text or a typed failure.
///
/// Carried in `AppState` as `Arc<dyn TextGenerator>` so tests can script responses.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        system: &str,
        params: SamplingParams,
    ) -> Result<String, ServiceError>;
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl LlmResponse {
    /// Extracts the text content from the first text block.
    pub fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

/// Production `TextGenerator` backed by the Anthropic Messages API.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
}

impl LlmClient {
    pub fn new(api_key: String) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self { client, api_key })
    }

    /// Makes a single call to the Claude API, returning the full response object.
    pub async fn call(
        &self,
        prompt: &str,
        system: &str,
        params: SamplingParams,
    ) -> Result<LlmResponse, ServiceError> {
        let request_body = AnthropicRequest {
            model: MODEL,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            warn!("LLM API returned {}: {}", status, body);
            let message = serde_json::from_str::<AnthropicError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            let error = ServiceError::new(Some(status.as_u16()), message);
            return Err(match retry_after {
                Some(wait) => error.with_retry_after(wait),
                None => error,
            });
        }

        let llm_response: LlmResponse = response.json().await?;

        debug!(
            "LLM call succeeded: input_tokens={}, output_tokens={}",
            llm_response.usage.input_tokens, llm_response.usage.output_tokens
        );

        Ok(llm_response)
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(
        &self,
        prompt: &str,
        system: &str,
        params: SamplingParams,
    ) -> Result<String, ServiceError> {
        let response = self.call(prompt, system, params).await?;
        match response.text() {
            Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
            _ => Err(ServiceError::new(None, "LLM returned empty content")),
        }
    }
}

/// Reads the server's wait hint: `retry-after-ms` (milliseconds) wins over
/// `retry-after` (whole seconds).
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v >= 0.0)
    };

    header("retry-after-ms")
        .map(|ms| Duration::from_secs_f64(ms / 1000.0))
        .or_else(|| header("retry-after").map(Duration::from_secs_f64))
}
