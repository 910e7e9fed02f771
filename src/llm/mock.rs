//! Scripted model for exercising the pipeline without network access.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{ChatModel, LlmError, ModelFactory};

/// Replays a queue of canned results, one per call.
///
/// Once the queue is drained the fallback result is returned forever.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    fallback: Result<String, LlmError>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(
        script: impl IntoIterator<Item = Result<String, LlmError>>,
        fallback: Result<String, LlmError>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with `text`.
    pub fn answering(text: impl Into<String>) -> Self {
        Self::new([], Ok(text.into()))
    }

    /// Always fail with `error`.
    pub fn failing(error: LlmError) -> Self {
        Self::new([], Err(error))
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received so far, oldest first.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let next = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front());
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Hands out the same shared model and counts how often it was asked to.
pub struct SharedModelFactory {
    pub model: Arc<ScriptedModel>,
    builds: AtomicUsize,
}

impl SharedModelFactory {
    pub fn new(model: Arc<ScriptedModel>) -> Self {
        Self {
            model,
            builds: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl ModelFactory for SharedModelFactory {
    fn build(&self) -> Result<Arc<dyn ChatModel>, LlmError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(self.model.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_fallback() {
        let model = ScriptedModel::new(
            [Err(LlmError::output_parse("bad json"))],
            Ok("fine".to_string()),
        );
        assert!(model.complete("a").await.is_err());
        assert_eq!(model.complete("b").await.unwrap(), "fine");
        assert_eq!(model.complete("c").await.unwrap(), "fine");
        assert_eq!(model.call_count(), 3);
        assert_eq!(model.prompts(), vec!["a", "b", "c"]);
    }
}
