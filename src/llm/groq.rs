//! Groq chat-completions client (OpenAI-compatible API).
use std::env;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ChatModel, LlmError, ModelFactory};
use crate::config::LlmConfig;

/// Env var holding the Groq API key.
pub const ENV_GROQ_API_KEY: &str = "GROQ_API_KEY";

/// Base delay between transport retries; doubles each time.
const TRANSPORT_BACKOFF: Duration = Duration::from_millis(500);

pub struct GroqClient {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
}

impl GroqClient {
    /// Build a client from `GROQ_API_KEY`.
    ///
    /// # Errors
    ///
    /// Configuration error when the variable is unset or empty.
    pub fn from_env(cfg: &LlmConfig, temperature: f32) -> Result<Self, LlmError> {
        let api_key = env::var(ENV_GROQ_API_KEY).unwrap_or_default();
        Self::with_api_key(api_key, cfg, temperature)
    }

    pub fn with_api_key(
        api_key: String,
        cfg: &LlmConfig,
        temperature: f32,
    ) -> Result<Self, LlmError> {
        if api_key.trim().is_empty() {
            return Err(LlmError::configuration(format!(
                "{ENV_GROQ_API_KEY} not found in environment variables"
            )));
        }

        let client = Client::builder()
            .timeout(cfg.timeout())
            .build()
            .map_err(|e| LlmError::configuration(format!("Error initializing Groq LLM: {e}")))?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/chat/completions", cfg.api_base.trim_end_matches('/')),
            model: cfg.model.clone(),
            temperature,
            max_tokens: cfg.max_tokens,
            max_retries: cfg.max_retries,
        })
    }

    async fn send_once(&self, body: &CompletionRequest<'_>) -> Result<String, Attempt> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Attempt::Transient(LlmError::other(format!("Groq API request failed: {e}"))))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Attempt::Transient(LlmError::other(format!("Groq API read failed: {e}"))))?;

        if status.is_success() {
            return parse_completion(&text).map_err(Attempt::Final);
        }

        let error = classify_failure(status, &text);
        if status.is_server_error() {
            Err(Attempt::Transient(error))
        } else {
            Err(Attempt::Final(error))
        }
    }
}

/// Outcome of one HTTP round trip that did not produce a completion.
enum Attempt {
    /// Worth retrying at the transport level (network errors, 5xx).
    Transient(LlmError),
    Final(LlmError),
}

#[async_trait]
impl ChatModel for GroqClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let body = CompletionRequest {
            model: &self.model,
            messages: vec![RequestMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut retry = 0;
        loop {
            match self.send_once(&body).await {
                Ok(text) => return Ok(text),
                Err(Attempt::Final(e)) => return Err(e),
                Err(Attempt::Transient(e)) if retry < self.max_retries => {
                    let delay = TRANSPORT_BACKOFF * 2u32.pow(retry);
                    warn!("{e}; retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(Attempt::Transient(e)) => return Err(e),
            }
        }
    }
}

/// Builds [`GroqClient`]s from the environment for chat sessions.
pub struct GroqFactory {
    pub config: LlmConfig,
    pub temperature: f32,
}

impl ModelFactory for GroqFactory {
    fn build(&self) -> Result<Arc<dyn ChatModel>, LlmError> {
        Ok(Arc::new(GroqClient::from_env(&self.config, self.temperature)?))
    }
}

// ── Wire types ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

/// Extract the first choice's text from a successful response body.
fn parse_completion(body: &str) -> Result<String, LlmError> {
    let parsed: CompletionResponse = serde_json::from_str(body)
        .map_err(|e| LlmError::output_parse(format!("failed to parse Groq response: {e}")))?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| LlmError::output_parse("Groq response contained no message content"))?;
    debug!("completion of {} chars", content.len());
    Ok(content)
}

/// Map a non-success response to an error kind using the status code and
/// the provider's structured error code.
fn classify_failure(status: StatusCode, body: &str) -> LlmError {
    let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let detail = envelope
        .as_ref()
        .map_or_else(|| body.trim().to_string(), |e| e.error.message.clone());
    let message = format!("Groq API error {status}: {detail}");

    let code_says_rate_limit = envelope.as_ref().is_some_and(|e| {
        [e.error.code.as_deref(), e.error.kind.as_deref()]
            .into_iter()
            .flatten()
            .any(|c| c == "rate_limit_exceeded")
    });

    if status == StatusCode::TOO_MANY_REQUESTS || code_says_rate_limit {
        LlmError::rate_limited(message)
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        LlmError::configuration(message)
    } else {
        LlmError::other(message)
    }
}
