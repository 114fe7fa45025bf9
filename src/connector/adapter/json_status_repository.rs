use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::application::StatusRepository;
use crate::domain::{CoreError, IndexStatus, WikiGenerationStatus, INDEX_STATUS_SCHEMA_VERSION};

pub const INDEX_STATUS_FILE: &str = "index_status.json";
pub const WIKI_STATUS_FILE: &str = "wiki_status.json";

/// Stores the two status documents as UTF-8 JSON files under the cache
/// directory. All maps inside the documents are ordered, so the files
/// diff cleanly between runs.
pub struct JsonStatusRepository {
    cache_dir: PathBuf,
}

impl JsonStatusRepository {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// A document that is absent or fails its schema check counts as no
    /// previous state; corruption is logged, never propagated.
    async fn load_document<T: DeserializeOwned>(&self, file: &str) -> Option<T> {
        let path = self.cache_dir.join(file);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_slice::<T>(&bytes) {
            Ok(document) => Some(document),
            Err(e) => {
                warn!(
                    "Corrupt status document {}, treating as no previous state: {}",
                    path.display(),
                    e
                );
                None
            }
        }
    }

    async fn save_document<T: Serialize>(&self, file: &str, document: &T) -> Result<(), CoreError> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let path = self.cache_dir.join(file);
        let json = serde_json::to_string_pretty(document)
            .map_err(|e| CoreError::storage(format!("Failed to serialize {}: {}", file, e)))?;
        tokio::fs::write(&path, json).await?;
        debug!("Wrote {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl StatusRepository for JsonStatusRepository {
    async fn load_index_status(&self) -> Result<Option<IndexStatus>, CoreError> {
        let status: Option<IndexStatus> = self.load_document(INDEX_STATUS_FILE).await;
        match status {
            Some(status) if status.schema_version() != INDEX_STATUS_SCHEMA_VERSION => {
                warn!(
                    "Index status schema version {} does not match expected {}, ignoring",
                    status.schema_version(),
                    INDEX_STATUS_SCHEMA_VERSION
                );
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn save_index_status(&self, status: &IndexStatus) -> Result<(), CoreError> {
        self.save_document(INDEX_STATUS_FILE, status).await
    }

    async fn load_wiki_status(&self) -> Result<Option<WikiGenerationStatus>, CoreError> {
        Ok(self.load_document(WIKI_STATUS_FILE).await)
    }

    async fn save_wiki_status(&self, status: &WikiGenerationStatus) -> Result<(), CoreError> {
        self.save_document(WIKI_STATUS_FILE, status).await
    }
}
