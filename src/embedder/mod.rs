//! Text embedding: the trait the pipeline depends on plus its backends.
pub mod download;
pub mod mock;
pub mod onnx;
pub mod tokenizer;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::config::ModelConfig;

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("tokenizer error: {0}")]
    TokenizerError(String),
}

/// Converts text into fixed-length vectors.
///
/// Implementations are shared across chat sessions behind `Arc`, hence the
/// `Send + Sync` bound.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple text strings into vectors.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;
}

/// Build the ONNX embedder described by `model`, fetching its files first
/// when they are not on disk yet.
pub fn load_embedder(model: &ModelConfig) -> Result<Arc<dyn Embedder>, EmbedderError> {
    let dir = Path::new(&model.dir);
    if !download::all_files_present(dir) {
        download::download_model_files(dir, &model.repo)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("{e:#}")))?;
    }
    let embedder = onnx::OnnxEmbedder::new(dir, model.dimensions)?;
    Ok(Arc::new(embedder))
}

/// Scale `vec` to unit length in place; the zero vector is left alone.
pub(crate) fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vec.iter_mut().for_each(|v| *v /= norm);
    }
}
