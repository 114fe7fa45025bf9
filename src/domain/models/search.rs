use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Chunk, ChunkKind, Language};
use crate::domain::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    chunk: Chunk,
    score: f32,
}

impl SearchResult {
    pub fn new(chunk: Chunk, score: f32) -> Self {
        Self { chunk, score }
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    pub fn into_chunk(self) -> Chunk {
        self.chunk
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn display_line(&self) -> String {
        format!("{} (score: {:.3})", self.chunk.location(), self.score)
    }
}

/// Optional scalar filters applied to a search.
///
/// Values are validated against the closed enums before any store I/O so
/// that typos fail fast instead of silently matching nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    language: Option<String>,
    kind: Option<String>,
    score_threshold: Option<f32>,
}

impl SearchFilters {
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = Some(threshold);
        self
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    pub fn score_threshold(&self) -> Option<f32> {
        self.score_threshold
    }

    pub fn is_empty(&self) -> bool {
        self.language.is_none() && self.kind.is_none() && self.score_threshold.is_none()
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if let Some(language) = &self.language {
            if !Language::parse(language).is_known() {
                return Err(CoreError::invalid_argument(format!(
                    "language: {:?} is not a valid value; accepted: {:?}",
                    language,
                    super::Limits::valid_languages()
                )));
            }
        }
        if let Some(kind) = &self.kind {
            if ChunkKind::parse(kind) == ChunkKind::Other && kind.to_lowercase() != "other" {
                return Err(CoreError::invalid_argument(format!(
                    "kind: {:?} is not a valid value; accepted: {:?}",
                    kind,
                    super::Limits::valid_kinds()
                )));
            }
        }
        Ok(())
    }

    /// In-memory predicate equivalent of the scalar filters.
    pub fn matches(&self, chunk: &Chunk) -> bool {
        if let Some(language) = &self.language {
            if chunk.language().as_str() != language.to_lowercase() {
                return false;
            }
        }
        if let Some(kind) = &self.kind {
            if chunk.kind().as_str() != kind.to_lowercase() {
                return false;
            }
        }
        true
    }
}

/// Aggregate counters returned by `get_stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_chunks: u64,
    pub languages: BTreeMap<String, u64>,
}

/// Cosine similarity. Normalises internally, so both normalised and raw
/// vectors are accepted.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Ranking order shared by every store implementation: score descending,
/// ties broken by id ascending so results are deterministic across runs.
pub fn rank_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score()
            .partial_cmp(&a.score())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk().id().cmp(b.chunk().id()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id_name: &str, start: u32) -> Chunk {
        Chunk::new(
            "test.rs".to_string(),
            format!("fn {}() {{}}", id_name),
            start,
            start,
            Language::Rust,
            ChunkKind::Function,
        )
        .with_name(id_name)
    }

    #[test]
    fn test_filter_validation_names_field_and_set() {
        let filters = SearchFilters::default().with_language("klingon");
        let err = filters.validate().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("language"));
        assert!(message.contains("klingon"));
        assert!(message.contains("python"));

        let filters = SearchFilters::default().with_kind("gadget");
        let err = filters.validate().unwrap_err();
        assert!(err.to_string().contains("kind"));
    }

    #[test]
    fn test_valid_filters_pass() {
        assert!(SearchFilters::default()
            .with_language("rust")
            .with_kind("function")
            .validate()
            .is_ok());
        assert!(SearchFilters::default().with_kind("other").validate().is_ok());
    }

    #[test]
    fn test_cosine_similarity_scale_invariant() {
        let a = vec![1.0, 2.0, 3.0];
        let b: Vec<f32> = a.iter().map(|x| x * 10.0).collect();
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[]), 0.0);
    }

    #[test]
    fn test_rank_results_breaks_ties_by_id() {
        let mut results = vec![
            SearchResult::new(chunk("zeta", 1), 0.5),
            SearchResult::new(chunk("alpha", 2), 0.5),
            SearchResult::new(chunk("mid", 3), 0.9),
        ];
        rank_results(&mut results);
        assert_eq!(results[0].chunk().name(), Some("mid"));
        assert_eq!(results[1].chunk().name(), Some("alpha"));
        assert_eq!(results[2].chunk().name(), Some("zeta"));
    }
}
