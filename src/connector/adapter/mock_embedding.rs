use async_trait::async_trait;
use rand::Rng;
use rand::SeedableRng;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::application::EmbeddingProvider;
use crate::domain::CoreError;

/// Deterministic seeded embeddings: equal texts always map to equal unit
/// vectors, so tests and offline runs behave reproducibly.
pub struct MockEmbeddingProvider {
    dimension: usize,
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self { dimension: 384 }
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self { dimension }
    }

    fn generate(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let seed = hasher.finish();

        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let mut vector: Vec<f32> = (0..self.dimension)
            .map(|_| rng.gen_range(-1.0..1.0))
            .collect();

        let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for x in &mut vector {
                *x /= magnitude;
            }
        }
        vector
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
        Ok(texts.iter().map(|t| self.generate(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_embeddings_are_deterministic() {
        let provider = MockEmbeddingProvider::new();
        let first = provider.embed(&["hello".to_string()]).await.unwrap();
        let second = provider.embed(&["hello".to_string()]).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_embeddings_are_unit_length() {
        let provider = MockEmbeddingProvider::with_dimension(64);
        let vectors = provider.embed(&["test".to_string()]).await.unwrap();
        assert_eq!(vectors[0].len(), 64);
        let magnitude: f32 = vectors[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_different_texts_differ() {
        let provider = MockEmbeddingProvider::new();
        let vectors = provider
            .embed(&["alpha".to_string(), "beta".to_string()])
            .await
            .unwrap();
        assert_ne!(vectors[0], vectors[1]);
    }
}
