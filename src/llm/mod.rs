//! Chat-completion client seam.
//!
//! The pipeline only sees [`ChatModel`]; failures come back as [`LlmError`]
//! tagged with an [`ErrorKind`] so retry decisions never depend on message
//! wording.
pub mod groq;
pub mod mock;

use async_trait::async_trait;
use thiserror::Error;

pub use groq::GroqClient;

/// How a failed completion should be treated by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The provider throttled the request.
    RateLimited,
    /// The provider answered but the payload could not be decoded.
    OutputParse,
    /// Missing or invalid credentials/settings.
    Configuration,
    /// Anything else: transport failures, server errors, rejected requests.
    Other,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct LlmError {
    kind: ErrorKind,
    message: String,
}

impl LlmError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn output_parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OutputParse, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Other, message)
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// A hosted language model that turns one prompt into one completion.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Human-readable identifier used in logs.
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Builds a fresh model client; chat sessions call this lazily on their
/// first message.
pub trait ModelFactory: Send + Sync {
    fn build(&self) -> Result<std::sync::Arc<dyn ChatModel>, LlmError>;
}
