use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::application::{EmbeddingProvider, VectorStore};
use crate::domain::{
    cosine_similarity, rank_results, Chunk, CoreError, Limits, SearchFilters, SearchResult,
    StoreStats,
};

/// In-memory reference implementation of the vector-store contract.
///
/// Used by tests and as a drop-in for ephemeral runs; behaviour (argument
/// validation, embed-on-write, ranking) matches the persistent store.
pub struct MemoryVectorStore {
    chunks: Arc<Mutex<HashMap<String, Chunk>>>,
    embedder: Arc<dyn EmbeddingProvider>,
    limits: Limits,
}

impl MemoryVectorStore {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self::with_limits(embedder, Limits::default())
    }

    pub fn with_limits(embedder: Arc<dyn EmbeddingProvider>, limits: Limits) -> Self {
        Self {
            chunks: Arc::new(Mutex::new(HashMap::new())),
            embedder,
            limits,
        }
    }

    async fn embed_missing(&self, chunks: &[Chunk]) -> Result<Vec<Chunk>, CoreError> {
        let mut prepared: Vec<Chunk> = chunks.to_vec();
        let texts: Vec<String> = prepared
            .iter()
            .filter(|c| c.embedding().is_none())
            .map(Chunk::embedding_text)
            .collect();
        if texts.is_empty() {
            return Ok(prepared);
        }

        let vectors = self.embedder.embed(&texts).await?;
        let mut vectors = vectors.into_iter();
        for chunk in prepared.iter_mut().filter(|c| c.embedding().is_none()) {
            let vector = vectors.next().ok_or_else(|| {
                CoreError::storage("Embedding provider returned fewer vectors than texts")
            })?;
            if vector.len() != self.embedder.dimension() {
                return Err(CoreError::invalid_argument(format!(
                    "Expected embedding dimension {}, got {}",
                    self.embedder.dimension(),
                    vector.len()
                )));
            }
            chunk.set_embedding(vector);
        }
        Ok(prepared)
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn create_or_update_table(
        &self,
        chunks: &[Chunk],
        replace: bool,
    ) -> Result<(), CoreError> {
        if replace {
            self.chunks.lock().await.clear();
        }
        self.add_chunks(chunks).await
    }

    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<(), CoreError> {
        if chunks.is_empty() {
            return Ok(());
        }
        let prepared = self.embed_missing(chunks).await?;
        let mut store = self.chunks.lock().await;
        for chunk in prepared {
            store.insert(chunk.id().to_string(), chunk);
        }
        debug!("Memory store now holds {} chunks", store.len());
        Ok(())
    }

    async fn replace_file_chunks(
        &self,
        file_path: &str,
        chunks: &[Chunk],
    ) -> Result<u64, CoreError> {
        let prepared = self.embed_missing(chunks).await?;
        let mut store = self.chunks.lock().await;
        let ids: Vec<String> = store
            .values()
            .filter(|c| c.file_path() == file_path)
            .map(|c| c.id().to_string())
            .collect();
        let deleted = ids.len() as u64;
        for id in ids {
            store.remove(&id);
        }
        for chunk in prepared {
            store.insert(chunk.id().to_string(), chunk);
        }
        Ok(deleted)
    }

    async fn delete_chunks_by_file(&self, file_path: &str) -> Result<u64, CoreError> {
        let mut store = self.chunks.lock().await;
        let ids: Vec<String> = store
            .values()
            .filter(|c| c.file_path() == file_path)
            .map(|c| c.id().to_string())
            .collect();
        for id in &ids {
            store.remove(id);
        }
        Ok(ids.len() as u64)
    }

    async fn get_chunk_by_id(&self, id: &str) -> Result<Option<Chunk>, CoreError> {
        Ok(self.chunks.lock().await.get(id).cloned())
    }

    async fn get_chunks_by_file(&self, file_path: &str) -> Result<Vec<Chunk>, CoreError> {
        let store = self.chunks.lock().await;
        let mut chunks: Vec<Chunk> = store
            .values()
            .filter(|c| c.file_path() == file_path)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| (c.start_line(), c.id().to_string()));
        Ok(chunks)
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<SearchResult>, CoreError> {
        let limit = self.limits.validate_search(limit, filters)?;

        let query_vector = self
            .embedder
            .embed(std::slice::from_ref(&query.to_string()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::storage("Embedding provider returned no query vector"))?;

        let store = self.chunks.lock().await;
        let mut results: Vec<SearchResult> = store
            .values()
            .filter(|chunk| filters.map_or(true, |f| f.matches(chunk)))
            .filter_map(|chunk| {
                chunk
                    .embedding()
                    .map(|embedding| (chunk, cosine_similarity(&query_vector, embedding)))
            })
            .filter(|(_, score)| {
                filters
                    .and_then(SearchFilters::score_threshold)
                    .map_or(true, |threshold| *score >= threshold)
            })
            .map(|(chunk, score)| SearchResult::new(chunk.clone(), score))
            .collect();

        rank_results(&mut results);
        results.truncate(limit);
        Ok(results)
    }

    async fn get_stats(&self) -> Result<StoreStats, CoreError> {
        let store = self.chunks.lock().await;
        let mut stats = StoreStats {
            total_chunks: store.len() as u64,
            ..Default::default()
        };
        for chunk in store.values() {
            *stats
                .languages
                .entry(chunk.language().as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(stats)
    }
}
