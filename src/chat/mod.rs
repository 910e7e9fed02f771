//! Interactive chat sessions.
//!
//! A [`ChatSession`] carries one conversation's history and its cached
//! pipeline. Everything shared between sessions (the vector store cache, the
//! embedder, the model factory) lives in a [`ChatContext`] handed to each
//! session explicitly. Hosts ([`repl`], [`server`]) drive the three hooks:
//! [`ChatSession::start`], [`ChatSession::on_message`] and
//! [`ChatSession::clear`].
pub mod repl;
pub mod server;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::embedder::Embedder;
use crate::format::{format_answer, format_sources};
use crate::llm::{LlmError, ModelFactory};
use crate::pipeline::{AnswerPipeline, EXHAUSTED_MESSAGE, QueryOutcome, RetryPolicy};
use crate::prompt::PromptTemplate;
use crate::store::{StoreCache, VectorStore};

pub const WELCOME_MESSAGE: &str = "🩺 **Welcome to MediBot!**\n\
I'm here to answer your medical questions based on provided information.\n\
Type your question below, and I'll respond with clear, accurate answers.";

pub const LOAD_FAILED_MESSAGE: &str = "Failed to load the vector store";
pub const NOT_INITIALIZED_MESSAGE: &str = "Vector store not initialized. Please restart the chat.";
pub const CLEARED_MESSAGE: &str = "Chat history cleared!";

/// State shared by every session of one host process.
pub struct ChatContext {
    pub stores: Arc<StoreCache>,
    pub embedder: Arc<dyn Embedder>,
    pub models: Arc<dyn ModelFactory>,
    pub prompt: PromptTemplate,
    pub retry: RetryPolicy,
    pub top_k: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// What a bot message is for, so hosts can style it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotMessageKind {
    Welcome,
    Answer,
    Notice,
    Error,
}

/// A message sent from the bot to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotMessage {
    pub kind: BotMessageKind,
    pub content: String,
}

impl BotMessage {
    fn new(kind: BotMessageKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
        }
    }
}

pub struct ChatSession {
    ctx: Arc<ChatContext>,
    history: Vec<ChatMessage>,
    store: Option<Arc<VectorStore>>,
    pipeline: OnceCell<Arc<AnswerPipeline>>,
}

impl ChatSession {
    /// Session-start hook: fetch the (shared, load-once) vector store and
    /// greet the user.
    pub async fn start(ctx: Arc<ChatContext>) -> (Self, Vec<BotMessage>) {
        let store = match ctx.stores.get().await {
            Ok(store) => Some(store),
            Err(e) => {
                warn!("session started without a vector store: {e}");
                None
            }
        };
        let greeting = match store {
            Some(_) => BotMessage::new(BotMessageKind::Welcome, WELCOME_MESSAGE),
            None => BotMessage::new(BotMessageKind::Error, LOAD_FAILED_MESSAGE),
        };

        let session = Self {
            ctx,
            history: Vec::new(),
            store,
            pipeline: OnceCell::new(),
        };
        (session, vec![greeting])
    }

    /// Message hook: answer `content` and return everything to show the user,
    /// retry notices included. Blank input produces no reply.
    pub async fn on_message(&mut self, content: &str) -> Vec<BotMessage> {
        if content.trim().is_empty() {
            return Vec::new();
        }
        self.history.push(ChatMessage {
            role: Role::User,
            content: content.to_string(),
        });

        let pipeline = match self.pipeline().await {
            Ok(Some(p)) => p,
            Ok(None) => return vec![BotMessage::new(BotMessageKind::Error, NOT_INITIALIZED_MESSAGE)],
            Err(e) => return vec![BotMessage::new(BotMessageKind::Error, format!("Error: {e}"))],
        };

        let mut replies = Vec::new();
        let outcome = pipeline
            .answer_with_retry(content, self.ctx.retry, |notice| {
                replies.push(BotMessage::new(BotMessageKind::Notice, notice.to_string()));
            })
            .await;

        match outcome {
            QueryOutcome::Answered { answer, .. } => {
                replies.push(BotMessage::new(
                    BotMessageKind::Answer,
                    format!(
                        "{}\n\n{}",
                        format_answer(&answer.text),
                        format_sources(&answer.sources)
                    ),
                ));
                self.history.push(ChatMessage {
                    role: Role::Assistant,
                    content: answer.text,
                });
            }
            QueryOutcome::Aborted { error, .. } => {
                replies.push(BotMessage::new(BotMessageKind::Error, format!("Error: {error}")));
            }
            QueryOutcome::Exhausted { .. } => {
                replies.push(BotMessage::new(BotMessageKind::Error, EXHAUSTED_MESSAGE));
            }
        }
        replies
    }

    /// Clear-history action.
    pub fn clear(&mut self) -> Vec<BotMessage> {
        self.history.clear();
        vec![BotMessage::new(BotMessageKind::Notice, CLEARED_MESSAGE)]
    }

    #[must_use]
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// The session's pipeline, built on first use from the cached store and a
    /// fresh model client. `None` when the store never loaded.
    async fn pipeline(&self) -> Result<Option<Arc<AnswerPipeline>>, LlmError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let pipeline = self
            .pipeline
            .get_or_try_init(|| async {
                let model = self.ctx.models.build()?;
                info!("pipeline ready for session (model {})", model.name());
                let pipeline = AnswerPipeline::new(
                    Arc::clone(store),
                    Arc::clone(&self.ctx.embedder),
                    model,
                    self.ctx.prompt.clone(),
                )
                .with_top_k(self.ctx.top_k);
                Ok::<_, LlmError>(Arc::new(pipeline))
            })
            .await?;
        Ok(Some(Arc::clone(pipeline)))
    }
}
