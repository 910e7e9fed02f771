/// Sentence-transformer tokenizer loaded from a HuggingFace `tokenizer.json`.
use std::path::Path;

use anyhow::Result;
use tokenizers::{Tokenizer, TruncationParams};

/// MiniLM was trained with 256-token inputs; longer text is truncated.
pub const MAX_TOKENS: usize = 256;

pub struct SentenceTokenizer {
    inner: Tokenizer,
}

/// Model inputs for one encoded text.
#[derive(Debug, Clone)]
pub struct Encoded {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub token_type_ids: Vec<i64>,
}

impl Encoded {
    #[must_use]
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

impl SentenceTokenizer {
    pub fn from_model_dir(model_dir: &Path) -> Result<Self> {
        let path = model_dir.join("tokenizer.json");
        anyhow::ensure!(
            path.exists(),
            "tokenizer.json not found in {}",
            model_dir.display()
        );

        let mut inner = Tokenizer::from_file(&path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;
        inner
            .with_truncation(Some(TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("failed to configure truncation: {e}"))?;
        // Single-text encoding: no padding needed.
        inner.with_padding(None);

        Ok(Self { inner })
    }

    pub fn encode(&self, text: &str) -> Result<Encoded> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("failed to encode text: {e}"))?;

        let widen = |xs: &[u32]| xs.iter().map(|&x| i64::from(x)).collect::<Vec<_>>();
        Ok(Encoded {
            input_ids: widen(encoding.get_ids()),
            attention_mask: widen(encoding.get_attention_mask()),
            token_type_ids: widen(encoding.get_type_ids()),
        })
    }

    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(false)
    }
}
