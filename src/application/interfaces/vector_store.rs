use async_trait::async_trait;

use crate::domain::{Chunk, CoreError, SearchFilters, SearchResult, StoreStats};

/// Persistent chunk storage with embedding search and scalar filters.
///
/// Implementations embed chunks that arrive without an embedding, validate
/// search arguments before any I/O, and rank results by cosine similarity
/// descending with ties broken by id ascending.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the backing table if needed; with `replace` the existing
    /// contents are dropped first.
    async fn create_or_update_table(&self, chunks: &[Chunk], replace: bool)
        -> Result<(), CoreError>;

    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<(), CoreError>;

    /// Atomically replace every chunk of one file: delete then insert
    /// within a single transaction of the underlying engine.
    async fn replace_file_chunks(
        &self,
        file_path: &str,
        chunks: &[Chunk],
    ) -> Result<u64, CoreError>;

    /// Returns the number of chunks deleted.
    async fn delete_chunks_by_file(&self, file_path: &str) -> Result<u64, CoreError>;

    async fn get_chunk_by_id(&self, id: &str) -> Result<Option<Chunk>, CoreError>;

    async fn get_chunks_by_file(&self, file_path: &str) -> Result<Vec<Chunk>, CoreError>;

    async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<SearchResult>, CoreError>;

    async fn get_stats(&self) -> Result<StoreStats, CoreError>;
}
