use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use duckdb::{Connection, Row};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::application::{EmbeddingProvider, VectorStore};
use crate::application::RetryPolicy;
use crate::domain::{
    Chunk, ChunkKind, CoreError, Language, Limits, SearchFilters, SearchResult, StoreStats,
};

/// Rows below this threshold are served by a plain scan; above it the
/// store opportunistically tries to build an HNSW index.
const VECTOR_INDEX_ROW_THRESHOLD: u64 = 5000;

const EMBED_BATCH_SIZE: usize = 32;

/// DuckDB-backed chunk store.
///
/// String predicates are built by escaping single quotes and wrapping in
/// single quotes; the engine sees them as opaque literals, which is the
/// sole mitigation against its SQL surface. Scalar indexes on `id` and
/// `file_path` are ensured on every open.
pub struct DuckdbVectorStore {
    conn: Arc<Mutex<Connection>>,
    embedder: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
    limits: Limits,
    vector_index_attempted: AtomicBool,
    /// Set when the backing tables failed to load; the store then reports
    /// itself empty through `get_stats`.
    degraded: bool,
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn vector_literal(vector: &[f32]) -> String {
    let mut s = String::with_capacity(vector.len() * 8 + 16);
    s.push('[');
    for (i, v) in vector.iter().enumerate() {
        if i > 0 {
            s.push_str(", ");
        }
        s.push_str(&format!("{}", v));
    }
    s.push_str("]::FLOAT[]");
    s
}

impl DuckdbVectorStore {
    pub fn new(path: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self, CoreError> {
        let conn = Connection::open(path)
            .map_err(|e| CoreError::storage(format!("Failed to open DuckDB database: {}", e)))?;
        Ok(Self::from_connection(conn, embedder))
    }

    pub fn in_memory(embedder: Arc<dyn EmbeddingProvider>) -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CoreError::storage(format!("Failed to open DuckDB in-memory DB: {}", e)))?;
        Ok(Self::from_connection(conn, embedder))
    }

    fn from_connection(conn: Connection, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        let degraded = match Self::initialize(&conn) {
            Ok(()) => false,
            Err(e) => {
                warn!("Vector store tables failed to load, treating store as empty: {}", e);
                true
            }
        };
        Self {
            conn: Arc::new(Mutex::new(conn)),
            embedder,
            retry: RetryPolicy::from_limits(&Limits::default()),
            limits: Limits::default(),
            vector_index_attempted: AtomicBool::new(false),
            degraded,
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.retry = RetryPolicy::from_limits(&limits);
        self.limits = limits;
        self
    }

    fn initialize(conn: &Connection) -> Result<(), CoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                file_path TEXT NOT NULL,
                language TEXT NOT NULL,
                kind TEXT NOT NULL,
                name TEXT,
                content TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                parent_name TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                embedding FLOAT[]
            );
            "#,
        )
        .map_err(|e| CoreError::storage(format!("Failed to initialize chunk table: {}", e)))?;

        Self::ensure_scalar_indexes(conn)?;
        debug!("DuckDB chunk schema initialized");
        Ok(())
    }

    /// Idempotent; runs on creation and on every open of an existing table.
    fn ensure_scalar_indexes(conn: &Connection) -> Result<(), CoreError> {
        conn.execute_batch(
            r#"
            CREATE INDEX IF NOT EXISTS idx_chunks_id ON chunks(id);
            CREATE INDEX IF NOT EXISTS idx_chunks_file_path ON chunks(file_path);
            "#,
        )
        .map_err(|e| CoreError::storage(format!("Failed to ensure scalar indexes: {}", e)))
    }

    /// Best-effort HNSW build once the table grows past the threshold.
    /// Failure leaves the store on its linear-scan path.
    fn maybe_build_vector_index(&self, conn: &Connection, row_count: u64) {
        if row_count < VECTOR_INDEX_ROW_THRESHOLD
            || self.vector_index_attempted.swap(true, Ordering::SeqCst)
        {
            return;
        }
        match conn.execute_batch(
            "INSTALL vss; LOAD vss; \
             SET hnsw_enable_experimental_persistence = true; \
             CREATE INDEX IF NOT EXISTS idx_chunks_embedding \
             ON chunks USING HNSW (embedding) WITH (metric = 'cosine');",
        ) {
            Ok(()) => debug!("HNSW vector index created ({} rows)", row_count),
            Err(e) => debug!("Vector index unavailable, staying on linear scan: {}", e),
        }
    }

    fn row_to_chunk(row: &Row) -> Result<Chunk, duckdb::Error> {
        let metadata_json: String = row.get(9)?;
        let metadata: BTreeMap<String, String> =
            serde_json::from_str(&metadata_json).unwrap_or_default();
        Ok(Chunk::reconstitute(
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(5)?,
            u32::try_from(row.get::<_, i64>(6)?).unwrap_or(0),
            u32::try_from(row.get::<_, i64>(7)?).unwrap_or(0),
            Language::parse(&row.get::<_, String>(2)?),
            ChunkKind::parse(&row.get::<_, String>(3)?),
            row.get::<_, Option<String>>(4)?,
            row.get::<_, Option<String>>(8)?,
            metadata,
            None,
        ))
    }

    const CHUNK_COLUMNS: &'static str =
        "id, file_path, language, kind, name, content, start_line, end_line, parent_name, metadata";

    async fn embed_missing(&self, chunks: &[Chunk]) -> Result<Vec<Chunk>, CoreError> {
        let mut prepared: Vec<Chunk> = chunks.to_vec();
        let missing: Vec<usize> = prepared
            .iter()
            .enumerate()
            .filter(|(_, c)| c.embedding().is_none())
            .map(|(i, _)| i)
            .collect();

        for batch in missing.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch
                .iter()
                .map(|&i| prepared[i].embedding_text())
                .collect();
            let vectors = self.retry.run(|| self.embedder.embed(&texts)).await?;
            if vectors.len() != batch.len() {
                return Err(CoreError::storage(
                    "Embedding provider returned fewer vectors than texts",
                ));
            }
            for (&i, vector) in batch.iter().zip(vectors) {
                if vector.len() != self.embedder.dimension() {
                    return Err(CoreError::invalid_argument(format!(
                        "Expected embedding dimension {}, got {}",
                        self.embedder.dimension(),
                        vector.len()
                    )));
                }
                prepared[i].set_embedding(vector);
            }
        }
        Ok(prepared)
    }

    fn insert_chunks(tx: &duckdb::Transaction<'_>, chunks: &[Chunk]) -> Result<(), CoreError> {
        for chunk in chunks {
            let metadata_json = serde_json::to_string(chunk.metadata())
                .map_err(|e| CoreError::storage(format!("Failed to encode metadata: {}", e)))?;
            let embedding_sql = match chunk.embedding() {
                Some(vector) => vector_literal(vector),
                None => "NULL".to_string(),
            };
            // The embedding literal is part of the statement because DuckDB
            // list values cannot be parameterized; it is built from our own
            // float data, never from user input.
            let sql = format!(
                "INSERT OR REPLACE INTO chunks \
                 ({}, embedding) VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {})",
                Self::CHUNK_COLUMNS,
                quote_literal(chunk.id()),
                quote_literal(chunk.file_path()),
                quote_literal(chunk.language().as_str()),
                quote_literal(chunk.kind().as_str()),
                chunk
                    .name()
                    .map(quote_literal)
                    .unwrap_or_else(|| "NULL".to_string()),
                quote_literal(chunk.content()),
                chunk.start_line(),
                chunk.end_line(),
                chunk
                    .parent_name()
                    .map(quote_literal)
                    .unwrap_or_else(|| "NULL".to_string()),
                quote_literal(&metadata_json),
                embedding_sql,
            );
            tx.execute_batch(&sql).map_err(|e| {
                CoreError::storage(format!("Failed to insert chunk {}: {}", chunk.id(), e))
            })?;
        }
        Ok(())
    }

    fn count_rows(conn: &Connection) -> Result<u64, CoreError> {
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .map_err(|e| CoreError::storage(format!("Failed to count chunks: {}", e)))?;
        Ok(count as u64)
    }
}

#[async_trait]
impl VectorStore for DuckdbVectorStore {
    async fn create_or_update_table(
        &self,
        chunks: &[Chunk],
        replace: bool,
    ) -> Result<(), CoreError> {
        {
            let conn = self.conn.lock().await;
            Self::initialize(&conn)?;
            if replace {
                conn.execute_batch("DELETE FROM chunks")
                    .map_err(|e| CoreError::storage(format!("Failed to clear chunks: {}", e)))?;
            }
        }
        self.add_chunks(chunks).await
    }

    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<(), CoreError> {
        if chunks.is_empty() {
            return Ok(());
        }
        let prepared = self.embed_missing(chunks).await?;

        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(|e| CoreError::storage(format!("Failed to begin transaction: {}", e)))?;
        Self::insert_chunks(&tx, &prepared)?;
        tx.commit()
            .map_err(|e| CoreError::storage(format!("Failed to commit: {}", e)))?;

        let row_count = Self::count_rows(&conn)?;
        self.maybe_build_vector_index(&conn, row_count);
        debug!("Saved {} chunks to DuckDB", prepared.len());
        Ok(())
    }

    async fn replace_file_chunks(
        &self,
        file_path: &str,
        chunks: &[Chunk],
    ) -> Result<u64, CoreError> {
        let prepared = self.embed_missing(chunks).await?;

        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(|e| CoreError::storage(format!("Failed to begin transaction: {}", e)))?;
        let deleted = tx
            .execute(
                &format!(
                    "DELETE FROM chunks WHERE file_path = {}",
                    quote_literal(file_path)
                ),
                [],
            )
            .map_err(|e| CoreError::storage(format!("Failed to delete chunks: {}", e)))?;
        Self::insert_chunks(&tx, &prepared)?;
        tx.commit()
            .map_err(|e| CoreError::storage(format!("Failed to commit: {}", e)))?;

        debug!(
            "Replaced {} chunks with {} for {}",
            deleted,
            prepared.len(),
            file_path
        );
        Ok(deleted as u64)
    }

    async fn delete_chunks_by_file(&self, file_path: &str) -> Result<u64, CoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(|e| CoreError::storage(format!("Failed to begin transaction: {}", e)))?;
        let deleted = tx
            .execute(
                &format!(
                    "DELETE FROM chunks WHERE file_path = {}",
                    quote_literal(file_path)
                ),
                [],
            )
            .map_err(|e| CoreError::storage(format!("Failed to delete chunks: {}", e)))?;
        tx.commit()
            .map_err(|e| CoreError::storage(format!("Failed to commit: {}", e)))?;
        Ok(deleted as u64)
    }

    async fn get_chunk_by_id(&self, id: &str) -> Result<Option<Chunk>, CoreError> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM chunks WHERE id = {}",
            Self::CHUNK_COLUMNS,
            quote_literal(id)
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| CoreError::storage(format!("Failed to prepare lookup: {}", e)))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| CoreError::storage(format!("Failed to run lookup: {}", e)))?;

        match rows
            .next()
            .map_err(|e| CoreError::storage(format!("Failed to read row: {}", e)))?
        {
            Some(row) => Ok(Some(Self::row_to_chunk(row).map_err(|e| {
                CoreError::storage(format!("Failed to parse chunk row: {}", e))
            })?)),
            None => Ok(None),
        }
    }

    async fn get_chunks_by_file(&self, file_path: &str) -> Result<Vec<Chunk>, CoreError> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM chunks WHERE file_path = {} ORDER BY start_line, id",
            Self::CHUNK_COLUMNS,
            quote_literal(file_path)
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| CoreError::storage(format!("Failed to prepare lookup: {}", e)))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| CoreError::storage(format!("Failed to run lookup: {}", e)))?;

        let mut chunks = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| CoreError::storage(format!("Failed to read row: {}", e)))?
        {
            chunks.push(
                Self::row_to_chunk(row)
                    .map_err(|e| CoreError::storage(format!("Failed to parse chunk row: {}", e)))?,
            );
        }
        Ok(chunks)
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<SearchResult>, CoreError> {
        // Fail before any I/O: limit and filter validation come first.
        let limit = self.limits.validate_search(limit, filters)?;

        let query_text = query.to_string();
        let query_vector = self
            .retry
            .run(|| self.embedder.embed(std::slice::from_ref(&query_text)))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::storage("Embedding provider returned no query vector"))?;

        let mut sql = format!(
            "SELECT {}, CAST(list_cosine_similarity(embedding, {}) AS FLOAT) AS score \
             FROM chunks WHERE embedding IS NOT NULL",
            Self::CHUNK_COLUMNS,
            vector_literal(&query_vector)
        );
        if let Some(filters) = filters {
            if let Some(language) = filters.language() {
                sql.push_str(&format!(
                    " AND language = {}",
                    quote_literal(&language.to_lowercase())
                ));
            }
            if let Some(kind) = filters.kind() {
                sql.push_str(&format!(" AND kind = {}", quote_literal(&kind.to_lowercase())));
            }
        }
        sql.push_str(&format!(" ORDER BY score DESC, id ASC LIMIT {}", limit));

        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| CoreError::storage(format!("Failed to prepare search: {}", e)))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| CoreError::storage(format!("Failed to run search: {}", e)))?;

        let threshold = filters.and_then(SearchFilters::score_threshold);
        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| CoreError::storage(format!("Failed to read search row: {}", e)))?
        {
            let score: f32 = row
                .get(10)
                .map_err(|e| CoreError::storage(format!("Failed to read score: {}", e)))?;
            if let Some(min) = threshold {
                if score < min {
                    continue;
                }
            }
            let chunk = Self::row_to_chunk(row)
                .map_err(|e| CoreError::storage(format!("Failed to parse chunk row: {}", e)))?;
            results.push(SearchResult::new(chunk, score));
        }
        Ok(results)
    }

    async fn get_stats(&self) -> Result<StoreStats, CoreError> {
        if self.degraded {
            return Ok(StoreStats::default());
        }
        let conn = self.conn.lock().await;

        let total_chunks = match Self::count_rows(&conn) {
            Ok(count) => count,
            Err(e) => {
                warn!("Stats query failed, reporting empty store: {}", e);
                return Ok(StoreStats::default());
            }
        };

        let mut languages = BTreeMap::new();
        let mut stmt = conn
            .prepare("SELECT language, COUNT(*) FROM chunks GROUP BY language ORDER BY language")
            .map_err(|e| CoreError::storage(format!("Failed to prepare stats: {}", e)))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| CoreError::storage(format!("Failed to run stats: {}", e)))?;
        while let Some(row) = rows
            .next()
            .map_err(|e| CoreError::storage(format!("Failed to read stats row: {}", e)))?
        {
            let language: String = row
                .get(0)
                .map_err(|e| CoreError::storage(format!("Failed to read language: {}", e)))?;
            let count: i64 = row
                .get(1)
                .map_err(|e| CoreError::storage(format!("Failed to read count: {}", e)))?;
            languages.insert(language, count as u64);
        }

        Ok(StoreStats {
            total_chunks,
            languages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_literal_escapes_quotes() {
        assert_eq!(quote_literal("safe"), "'safe'");
        assert_eq!(quote_literal("' OR '1'='1"), "''' OR ''1''=''1'");
    }

    #[test]
    fn test_vector_literal_shape() {
        assert_eq!(vector_literal(&[1.0, -0.5]), "[1, -0.5]::FLOAT[]");
    }
}
