use async_trait::async_trait;

use crate::domain::{CoreError, IndexStatus, WikiGenerationStatus};

/// Persistence for the two status documents under the cache directory.
///
/// Loads return `Ok(None)` both when no document exists and when the
/// persisted document fails its schema check; corrupt state is logged and
/// treated as absent, never propagated.
#[async_trait]
pub trait StatusRepository: Send + Sync {
    async fn load_index_status(&self) -> Result<Option<IndexStatus>, CoreError>;

    async fn save_index_status(&self, status: &IndexStatus) -> Result<(), CoreError>;

    async fn load_wiki_status(&self) -> Result<Option<WikiGenerationStatus>, CoreError>;

    async fn save_wiki_status(&self, status: &WikiGenerationStatus) -> Result<(), CoreError>;
}
