//! Retrieval-augmented answering: embed, retrieve, prompt, complete.
//!
//! [`AnswerPipeline::answer`] makes a single attempt. [`AnswerPipeline::answer_with_retry`]
//! wraps it in the user-facing retry policy: parse failures and rate limits
//! are retried with a pause, anything else ends the query at once, and an
//! exhausted budget becomes [`QueryOutcome::Exhausted`] rather than an error.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::RetryConfig;
use crate::embedder::{Embedder, EmbedderError};
use crate::llm::{ChatModel, ErrorKind, LlmError};
use crate::prompt::PromptTemplate;
use crate::store::{Passage, StoreError, VectorStore};

/// Passages retrieved per query unless configured otherwise.
pub const DEFAULT_TOP_K: usize = 3;

/// Shown when every attempt failed with a retryable error.
pub const EXHAUSTED_MESSAGE: &str =
    "Max retry attempts reached. Please try again later or check your API key and model availability.";

/// Model output together with the passages it was grounded on.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<Passage>,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Embedding(#[from] EmbedderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("retrieval task failed: {0}")]
    Worker(String),
}

impl PipelineError {
    /// Kind of the underlying model failure, if this is one.
    #[must_use]
    pub fn llm_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Llm(e) => Some(e.kind()),
            _ => None,
        }
    }
}

/// Attempt budget and pauses for [`AnswerPipeline::answer_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub parse_backoff: Duration,
    pub rate_limit_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            parse_backoff: Duration::from_millis(cfg.parse_backoff_ms),
            rate_limit_backoff: Duration::from_millis(cfg.rate_limit_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Same budget, no pauses.
    #[must_use]
    pub fn without_backoff(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            parse_backoff: Duration::ZERO,
            rate_limit_backoff: Duration::ZERO,
        }
    }
}

/// Progress report emitted before each retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryNotice {
    OutputParse { error: String, attempt: u32, max: u32 },
    RateLimited {
        error: String,
        attempt: u32,
        max: u32,
        wait: Duration,
    },
}

impl fmt::Display for RetryNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutputParse { error, attempt, max } => {
                write!(f, "Error parsing output: {error}. Retrying... ({attempt}/{max})")
            }
            Self::RateLimited {
                error,
                attempt,
                max,
                wait,
            } => write!(
                f,
                "Rate limit error: {error}. Retrying in {} seconds... ({attempt}/{max})",
                wait.as_secs_f32()
            ),
        }
    }
}

/// Terminal result of a retried query.
#[derive(Debug)]
pub enum QueryOutcome {
    Answered { answer: Answer, attempts: u32 },
    /// A non-retryable failure; the error is reported as-is.
    Aborted { error: PipelineError, attempts: u32 },
    /// Every attempt hit a retryable failure.
    Exhausted { attempts: u32 },
}

impl QueryOutcome {
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Answered { attempts, .. }
            | Self::Aborted { attempts, .. }
            | Self::Exhausted { attempts } => *attempts,
        }
    }
}

pub struct AnswerPipeline {
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn ChatModel>,
    prompt: PromptTemplate,
    top_k: usize,
}

impl AnswerPipeline {
    pub fn new(
        store: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn ChatModel>,
        prompt: PromptTemplate,
    ) -> Self {
        Self {
            store,
            embedder,
            model,
            prompt,
            top_k: DEFAULT_TOP_K,
        }
    }

    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Embed `query` and fetch its nearest passages on the blocking pool.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<Passage>, PipelineError> {
        let store = Arc::clone(&self.store);
        let embedder = Arc::clone(&self.embedder);
        let query = query.to_string();
        let top_k = self.top_k;

        tokio::task::spawn_blocking(move || -> Result<Vec<Passage>, PipelineError> {
            let vector = embedder.embed(&query)?;
            Ok(store.search(&vector, top_k)?)
        })
        .await
        .map_err(|e| PipelineError::Worker(e.to_string()))?
    }

    /// One attempt: retrieve, render, complete.
    pub async fn answer(&self, query: &str) -> Result<Answer, PipelineError> {
        let sources = self.retrieve(query).await?;
        let context = sources
            .iter()
            .map(|p| p.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = self.prompt.render(&context, query);
        debug!(
            "prompt of {} chars from {} passages",
            prompt.len(),
            sources.len()
        );

        let text = self.model.complete(&prompt).await?;
        Ok(Answer { text, sources })
    }

    /// Run [`answer`](Self::answer) under `policy`, reporting each retry to
    /// `notify`.
    pub async fn answer_with_retry(
        &self,
        query: &str,
        policy: RetryPolicy,
        mut notify: impl FnMut(RetryNotice),
    ) -> QueryOutcome {
        let max = policy.max_attempts;
        for attempt in 1..=max {
            let error = match self.answer(query).await {
                Ok(answer) => {
                    info!("answered via {} on attempt {attempt}", self.model.name());
                    return QueryOutcome::Answered {
                        answer,
                        attempts: attempt,
                    };
                }
                Err(e) => e,
            };

            let (notice, wait) = match error.llm_kind() {
                Some(ErrorKind::OutputParse) => (
                    RetryNotice::OutputParse {
                        error: error.to_string(),
                        attempt,
                        max,
                    },
                    policy.parse_backoff,
                ),
                Some(ErrorKind::RateLimited) => (
                    RetryNotice::RateLimited {
                        error: error.to_string(),
                        attempt,
                        max,
                        wait: policy.rate_limit_backoff,
                    },
                    policy.rate_limit_backoff,
                ),
                _ => {
                    warn!("query aborted: {error}");
                    return QueryOutcome::Aborted {
                        error,
                        attempts: attempt,
                    };
                }
            };

            warn!("{notice}");
            notify(notice);
            if attempt < max && !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }

        QueryOutcome::Exhausted { attempts: max }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::mock::MockEmbedder;
    use crate::llm::mock::ScriptedModel;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::time::Instant;

    const DIMS: usize = 256;

    fn seeded_store() -> (TempDir, Arc<VectorStore>) {
        let dir = tempfile::tempdir().unwrap();
        let embedder = MockEmbedder::new(DIMS);
        let passages = vec![
            Passage::new("Fever is treated with rest, fluids and antipyretics.")
                .with_meta("source", json!("fever.pdf")),
            Passage::new("Asthma attacks are relieved with a rescue inhaler.")
                .with_meta("source", json!("asthma.pdf")),
            Passage::new("Sprained ankles need ice, compression and elevation."),
            Passage::new("Migraine triggers include stress and poor sleep."),
        ];
        let texts: Vec<&str> = passages.iter().map(|p| p.content.as_str()).collect();
        let vectors = embedder.embed_batch(&texts).unwrap();
        let store = VectorStore::create(dir.path(), DIMS).unwrap();
        store.add_passages(&passages, &vectors).unwrap();
        (dir, Arc::new(store))
    }

    fn pipeline(model: Arc<ScriptedModel>) -> (TempDir, AnswerPipeline) {
        let (dir, store) = seeded_store();
        let p = AnswerPipeline::new(
            store,
            Arc::new(MockEmbedder::new(DIMS)),
            model,
            PromptTemplate::ask(),
        );
        (dir, p)
    }

    #[tokio::test]
    async fn test_answer_returns_top_k_sources() {
        let model = Arc::new(ScriptedModel::answering("Rest and drink fluids."));
        let (_dir, p) = pipeline(model.clone());

        let answer = p.answer("How is a fever treated?").await.unwrap();
        assert_eq!(answer.text, "Rest and drink fluids.");
        assert_eq!(answer.sources.len(), DEFAULT_TOP_K);
        assert!(answer.sources[0].content.starts_with("Fever"));

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Question: How is a fever treated?"));
        assert!(prompts[0].contains("Fever is treated with rest"));
    }

    #[tokio::test]
    async fn test_with_top_k() {
        let model = Arc::new(ScriptedModel::answering("ok"));
        let (_dir, p) = pipeline(model);
        let p = p.with_top_k(1);
        assert_eq!(p.answer("asthma inhaler").await.unwrap().sources.len(), 1);
    }

    #[tokio::test]
    async fn test_parse_errors_then_success() {
        let model = Arc::new(ScriptedModel::new(
            [
                Err(LlmError::output_parse("unexpected token")),
                Err(LlmError::output_parse("unexpected token")),
            ],
            Ok("Use a rescue inhaler.".to_string()),
        ));
        let (_dir, p) = pipeline(model.clone());

        let mut notices = Vec::new();
        let outcome = p
            .answer_with_retry("asthma?", RetryPolicy::without_backoff(3), |n| {
                notices.push(n.to_string())
            })
            .await;

        match outcome {
            QueryOutcome::Answered { answer, attempts } => {
                assert_eq!(attempts, 3);
                assert_eq!(answer.text, "Use a rescue inhaler.");
            }
            other => panic!("expected an answer, got {other:?}"),
        }
        assert_eq!(model.call_count(), 3);
        assert_eq!(
            notices,
            vec![
                "Error parsing output: unexpected token. Retrying... (1/3)",
                "Error parsing output: unexpected token. Retrying... (2/3)",
            ]
        );
    }

    #[tokio::test]
    async fn test_rate_limit_exhausts_budget() {
        let model = Arc::new(ScriptedModel::failing(LlmError::rate_limited(
            "Rate limit reached",
        )));
        let (_dir, p) = pipeline(model.clone());

        let mut notices = Vec::new();
        let outcome = p
            .answer_with_retry("anything", RetryPolicy::without_backoff(3), |n| {
                notices.push(n)
            })
            .await;

        assert!(matches!(outcome, QueryOutcome::Exhausted { attempts: 3 }));
        assert_eq!(model.call_count(), 3);
        assert_eq!(notices.len(), 3);
        assert!(matches!(
            notices[2],
            RetryNotice::RateLimited {
                attempt: 3,
                max: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_rate_limit_notice_text() {
        let notice = RetryNotice::RateLimited {
            error: "Rate limit reached".to_string(),
            attempt: 1,
            max: 3,
            wait: RetryPolicy::default().rate_limit_backoff,
        };
        assert_eq!(
            notice.to_string(),
            "Rate limit error: Rate limit reached. Retrying in 5 seconds... (1/3)"
        );
    }

    #[test]
    fn test_rate_limit_notice_fractional_wait() {
        let notice = RetryNotice::RateLimited {
            error: "Rate limit reached".to_string(),
            attempt: 2,
            max: 3,
            wait: Duration::from_millis(2500),
        };
        assert_eq!(
            notice.to_string(),
            "Rate limit error: Rate limit reached. Retrying in 2.5 seconds... (2/3)"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_between_attempts_only() {
        let model = Arc::new(ScriptedModel::failing(LlmError::rate_limited(
            "Rate limit reached",
        )));
        let (_dir, p) = pipeline(model.clone());

        let start = Instant::now();
        let outcome = p
            .answer_with_retry("anything", RetryPolicy::default(), |_| {})
            .await;

        assert!(matches!(outcome, QueryOutcome::Exhausted { attempts: 3 }));
        // 5s after attempts 1 and 2, nothing after the last one.
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11),
            "waited {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_errors_wait_shorter_backoff() {
        let model = Arc::new(ScriptedModel::new(
            [
                Err(LlmError::output_parse("unexpected token")),
                Err(LlmError::output_parse("unexpected token")),
            ],
            Ok("Use a rescue inhaler.".to_string()),
        ));
        let (_dir, p) = pipeline(model);

        let start = Instant::now();
        let outcome = p
            .answer_with_retry("asthma?", RetryPolicy::default(), |_| {})
            .await;

        assert_eq!(outcome.attempts(), 3);
        assert!(matches!(outcome, QueryOutcome::Answered { .. }));
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_secs(4) && elapsed < Duration::from_secs(5),
            "waited {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn test_other_error_aborts_after_one_attempt() {
        let model = Arc::new(ScriptedModel::failing(LlmError::other(
            "Groq API error 404 Not Found: model does not exist",
        )));
        let (_dir, p) = pipeline(model.clone());

        let mut notices = Vec::new();
        let outcome = p
            .answer_with_retry("anything", RetryPolicy::without_backoff(3), |n| {
                notices.push(n)
            })
            .await;

        match outcome {
            QueryOutcome::Aborted { error, attempts } => {
                assert_eq!(attempts, 1);
                assert_eq!(
                    error.to_string(),
                    "Groq API error 404 Not Found: model does not exist"
                );
            }
            other => panic!("expected abort, got {other:?}"),
        }
        assert_eq!(model.call_count(), 1);
        assert!(notices.is_empty());
    }

    #[tokio::test]
    async fn test_configuration_error_is_not_retried() {
        let model = Arc::new(ScriptedModel::failing(LlmError::configuration(
            "GROQ_API_KEY not found in environment variables",
        )));
        let (_dir, p) = pipeline(model.clone());

        let outcome = p
            .answer_with_retry("q", RetryPolicy::without_backoff(3), |_| {})
            .await;
        assert_eq!(outcome.attempts(), 1);
        assert!(matches!(outcome, QueryOutcome::Aborted { .. }));
    }

    #[test]
    fn test_policy_from_config() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.parse_backoff, Duration::from_secs(2));
        assert_eq!(policy.rate_limit_backoff, Duration::from_secs(5));
    }
}
