use serde::{Deserialize, Serialize};

use super::Language;

/// Per-file bookkeeping used for incremental indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    path: String,
    language: Language,
    size_bytes: u64,
    last_modified: u64,
    content_hash: String,
    chunk_count: u64,
}

impl FileRecord {
    pub fn new(
        path: String,
        language: Language,
        size_bytes: u64,
        last_modified: u64,
        content_hash: String,
        chunk_count: u64,
    ) -> Self {
        Self {
            path,
            language,
            size_bytes,
            last_modified,
            content_hash,
            chunk_count,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn last_modified(&self) -> u64 {
        self.last_modified
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunk_count
    }
}

/// SHA-256 over the raw file bytes, lowercase hex.
pub fn compute_content_hash(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let hash = Sha256::digest(bytes);
    format!("{:x}", hash)
}

/// Seconds since the Unix epoch, saturating at zero for pre-epoch clocks.
pub fn epoch_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
