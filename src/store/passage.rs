use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A text snippet retrieved from the index, with its source metadata.
///
/// Metadata keys are free-form; the formatter looks for `source`, `title`
/// and `page`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Passage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Metadata value rendered for display: strings unquoted, everything
    /// else in its JSON form.
    #[must_use]
    pub fn meta_display(&self, key: &str) -> Option<String> {
        self.metadata.get(key).map(|value| match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}
