/// Model-free embedder for tests and offline runs.
///
/// Each lowercase alphanumeric word is hashed into one of `dimensions`
/// buckets, so texts sharing vocabulary land close together under cosine
/// distance. Deterministic within a build.
use std::hash::{DefaultHasher, Hash, Hasher};

use super::{Embedder, EmbedderError, normalize};

pub struct MockEmbedder {
    pub dimensions: usize,
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn bucket(&self, word: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        word.hash(&mut hasher);
        (hasher.finish() % self.dimensions as u64) as usize
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self { dimensions: 384 }
    }
}

impl Embedder for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        if self.dimensions == 0 {
            return Err(EmbedderError::InferenceFailed(
                "zero-dimensional embedder".to_string(),
            ));
        }

        let mut embedding = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            embedding[self.bucket(&word.to_lowercase())] += 1.0;
        }
        normalize(&mut embedding);
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_mock_embed_dimensions() {
        let embedder = MockEmbedder::new(64);
        assert_eq!(embedder.embed("hello world").unwrap().len(), 64);
    }

    #[test]
    fn test_mock_embed_deterministic() {
        let embedder = MockEmbedder::default();
        let a = embedder.embed("Fever in children").unwrap();
        let b = embedder.embed("fever in CHILDREN").unwrap();
        assert_eq!(a, b, "case and punctuation should not matter");
    }

    #[test]
    fn test_shared_vocabulary_is_closer() {
        let embedder = MockEmbedder::default();
        let query = embedder.embed("how to treat a fever").unwrap();
        let near = embedder.embed("treat fever with fluids and rest").unwrap();
        let far = embedder.embed("ankle sprain bandage").unwrap();
        assert!(cosine(&query, &near) > cosine(&query, &far));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = MockEmbedder::new(16);
        assert!(embedder.embed("  ").unwrap().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_mock_embed_batch() {
        let embedder = MockEmbedder::new(128);
        let results = embedder.embed_batch(&["a", "b", "c"]).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|v| v.len() == 128));
    }
}
