//! ONNX Runtime backend for `all-MiniLM-L6-v2`.
//!
//! Runs the transformer, mean-pools token states under the attention mask
//! and L2-normalizes, matching the sentence-transformers recipe the index
//! was built with.
use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, info};

use super::tokenizer::SentenceTokenizer;
use super::{Embedder, EmbedderError, normalize};

pub struct OnnxEmbedder {
    session: Mutex<Session>,
    tokenizer: SentenceTokenizer,
    dimensions: usize,
}

impl OnnxEmbedder {
    /// Load `model.onnx` and `tokenizer.json` from `model_dir`.
    pub fn new(model_dir: &Path, dimensions: usize) -> Result<Self, EmbedderError> {
        let model_path = model_dir.join("model.onnx");
        if !model_path.exists() {
            return Err(EmbedderError::ModelLoadFailed(format!(
                "model.onnx not found in {}",
                model_dir.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| load_err("session builder", e))?
            .with_intra_threads(2)
            .map_err(|e| load_err("thread config", e))?
            .commit_from_file(&model_path)
            .map_err(|e| load_err("model load", e))?;

        let tokenizer = SentenceTokenizer::from_model_dir(model_dir)
            .map_err(|e| EmbedderError::TokenizerError(e.to_string()))?;

        info!(
            "Embedding model ready: {} (vocab {}, {dimensions} dims)",
            model_dir.display(),
            tokenizer.vocab_size()
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            dimensions,
        })
    }
}

impl Embedder for OnnxEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let encoded = self
            .tokenizer
            .encode(text)
            .map_err(|e| EmbedderError::TokenizerError(e.to_string()))?;
        let seq_len = encoded.len();
        debug!("embedding {seq_len} tokens");

        let tensor = |name: &str, data: Vec<i64>| {
            Tensor::from_array(([1usize, seq_len], data))
                .map_err(|e| EmbedderError::InferenceFailed(format!("{name}: {e}")))
        };
        let input_ids = tensor("input_ids", encoded.input_ids)?;
        let attention_mask = tensor("attention_mask", encoded.attention_mask.clone())?;
        let token_type_ids = tensor("token_type_ids", encoded.token_type_ids)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| EmbedderError::InferenceFailed(format!("lock poisoned: {e}")))?;
        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
                "token_type_ids" => token_type_ids,
            ])
            .map_err(|e| EmbedderError::InferenceFailed(e.to_string()))?;

        // last_hidden_state: [1, seq_len, hidden]
        let (_shape, hidden) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("output extraction: {e}")))?;
        if hidden.len() != seq_len * self.dimensions {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {} hidden values, got {}",
                seq_len * self.dimensions,
                hidden.len()
            )));
        }

        let mut pooled = masked_mean(hidden, &encoded.attention_mask, self.dimensions);
        normalize(&mut pooled);
        Ok(pooled)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn load_err(stage: &str, e: impl std::fmt::Display) -> EmbedderError {
    EmbedderError::ModelLoadFailed(format!("{stage}: {e}"))
}

/// Average the token rows of `hidden` whose mask entry is set.
fn masked_mean(hidden: &[f32], mask: &[i64], width: usize) -> Vec<f32> {
    let mut sum = vec![0.0f32; width];
    let mut kept = 0.0f32;
    for (row, &m) in hidden.chunks_exact(width).zip(mask) {
        if m == 0 {
            continue;
        }
        kept += 1.0;
        sum.iter_mut().zip(row).for_each(|(s, v)| *s += v);
    }
    if kept > 0.0 {
        sum.iter_mut().for_each(|s| *s /= kept);
    }
    sum
}
