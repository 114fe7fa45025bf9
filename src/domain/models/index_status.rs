use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::FileRecord;

pub const INDEX_STATUS_SCHEMA_VERSION: u32 = 1;

/// Persisted outcome of an indexing run: per-file hashes and counts.
///
/// Maps are `BTreeMap` so the JSON serialisation is byte-stable and the
/// status hash is deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStatus {
    schema_version: u32,
    repo_path: String,
    generated_at: u64,
    total_files: u64,
    total_chunks: u64,
    languages: BTreeMap<String, u64>,
    files: BTreeMap<String, FileRecord>,
}

impl IndexStatus {
    pub fn new(repo_path: String, generated_at: u64) -> Self {
        Self {
            schema_version: INDEX_STATUS_SCHEMA_VERSION,
            repo_path,
            generated_at,
            total_files: 0,
            total_chunks: 0,
            languages: BTreeMap::new(),
            files: BTreeMap::new(),
        }
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn repo_path(&self) -> &str {
        &self.repo_path
    }

    pub fn generated_at(&self) -> u64 {
        self.generated_at
    }

    pub fn total_files(&self) -> u64 {
        self.total_files
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    pub fn languages(&self) -> &BTreeMap<String, u64> {
        &self.languages
    }

    pub fn files(&self) -> &BTreeMap<String, FileRecord> {
        &self.files
    }

    pub fn file(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(path)
    }

    pub fn content_hash_of(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(|f| f.content_hash())
    }

    pub fn record_file(&mut self, record: FileRecord) {
        self.total_files += 1;
        self.total_chunks += record.chunk_count();
        *self
            .languages
            .entry(record.language().as_str().to_string())
            .or_insert(0) += 1;
        self.files.insert(record.path().to_string(), record);
    }

    /// SHA-256 over the deterministic JSON serialisation; used by the wiki
    /// generator as `index_status_hash`.
    pub fn status_hash(&self) -> String {
        use sha2::{Digest, Sha256};
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("{:x}", Sha256::digest(json.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Language;

    fn record(path: &str, hash: &str, chunks: u64) -> FileRecord {
        FileRecord::new(
            path.to_string(),
            Language::Rust,
            10,
            1_700_000_000,
            hash.to_string(),
            chunks,
        )
    }

    #[test]
    fn test_record_file_accumulates_counts() {
        let mut status = IndexStatus::new("/repo".to_string(), 1);
        status.record_file(record("a.rs", "h1", 3));
        status.record_file(record("b.rs", "h2", 2));

        assert_eq!(status.total_files(), 2);
        assert_eq!(status.total_chunks(), 5);
        assert_eq!(status.languages().get("rust"), Some(&2));
        assert_eq!(status.content_hash_of("a.rs"), Some("h1"));
        assert_eq!(status.content_hash_of("missing.rs"), None);
    }

    #[test]
    fn test_status_hash_is_order_independent() {
        let mut first = IndexStatus::new("/repo".to_string(), 1);
        first.record_file(record("a.rs", "h1", 1));
        first.record_file(record("b.rs", "h2", 1));

        let mut second = IndexStatus::new("/repo".to_string(), 1);
        second.record_file(record("b.rs", "h2", 1));
        second.record_file(record("a.rs", "h1", 1));

        assert_eq!(first.status_hash(), second.status_hash());
    }

    #[test]
    fn test_hash_changes_with_content() {
        let mut first = IndexStatus::new("/repo".to_string(), 1);
        first.record_file(record("a.rs", "h1", 1));

        let mut second = IndexStatus::new("/repo".to_string(), 1);
        second.record_file(record("a.rs", "other", 1));

        assert_ne!(first.status_hash(), second.status_hash());
    }
}
