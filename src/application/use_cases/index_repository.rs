use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::application::{Chunker, StatusRepository, VectorStore};
use crate::domain::{
    compute_content_hash, epoch_seconds, CoreError, FileRecord, IndexStatus, Language,
};

/// Walks a repository, chunks changed files and keeps the vector store and
/// the persisted [`IndexStatus`] in sync.
///
/// Files whose content hash matches the previous status are skipped
/// entirely: no parse, no store writes. Work is keyed by file path, so a
/// single writer per path holds by construction.
pub struct IndexRepositoryUseCase {
    store: Arc<dyn VectorStore>,
    chunker: Arc<dyn Chunker>,
    status_repo: Arc<dyn StatusRepository>,
    workers: usize,
}

enum FileOutcome {
    Unchanged(FileRecord),
    Indexed(FileRecord),
    Skipped,
}

impl IndexRepositoryUseCase {
    pub fn new(
        store: Arc<dyn VectorStore>,
        chunker: Arc<dyn Chunker>,
        status_repo: Arc<dyn StatusRepository>,
        workers: usize,
    ) -> Self {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            store,
            chunker,
            status_repo,
            workers: workers.clamp(1, cpu_count),
        }
    }

    pub async fn execute(
        &self,
        repo_root: &Path,
        include_globs: &[String],
        exclude_globs: &[String],
    ) -> Result<IndexStatus, CoreError> {
        let repo_root = repo_root
            .canonicalize()
            .map_err(|e| CoreError::invalid_argument(format!("Invalid repository path: {}", e)))?;

        let start_time = Instant::now();
        let previous = self.status_repo.load_index_status().await?;

        let candidates = Self::enumerate_files(&repo_root, include_globs, exclude_globs)?;
        let total_files = candidates.len() as u64;
        info!("Found {} candidate files under {}", total_files, repo_root.display());

        let progress_bar = ProgressBar::new(total_files);
        progress_bar.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} {bar:40.green/dim} {pos}/{len} {msg:.dim}")
                .expect("Invalid progress bar template")
                .progress_chars("━━─"),
        );

        let previous = Arc::new(previous);
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut join_set: JoinSet<Result<FileOutcome, CoreError>> = JoinSet::new();

        for (relative_path, absolute_path) in candidates {
            let store = Arc::clone(&self.store);
            let chunker = Arc::clone(&self.chunker);
            let previous = Arc::clone(&previous);
            let semaphore = Arc::clone(&semaphore);
            let progress = progress_bar.clone();

            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| CoreError::storage(format!("Worker pool closed: {}", e)))?;
                let outcome =
                    Self::process_file(&*store, &*chunker, &previous, &relative_path, &absolute_path)
                        .await;
                progress.set_message(relative_path);
                progress.inc(1);
                outcome
            });
        }

        let mut status = IndexStatus::new(repo_root.to_string_lossy().to_string(), epoch_seconds());
        let mut indexed = 0u64;
        let mut unchanged = 0u64;
        while let Some(joined) = join_set.join_next().await {
            let outcome = joined
                .map_err(|e| CoreError::storage(format!("Indexing worker failed: {}", e)))??;
            match outcome {
                FileOutcome::Unchanged(record) => {
                    unchanged += 1;
                    status.record_file(record);
                }
                FileOutcome::Indexed(record) => {
                    indexed += 1;
                    status.record_file(record);
                }
                FileOutcome::Skipped => {}
            }
        }
        progress_bar.finish_and_clear();

        // Files present in the previous run but gone now lose their chunks.
        let mut deleted = 0u64;
        if let Some(previous) = previous.as_ref() {
            for path in previous.files().keys() {
                if status.file(path).is_none() {
                    debug!("Removing deleted file from store: {}", path);
                    self.store.delete_chunks_by_file(path).await?;
                    deleted += 1;
                }
            }
        }

        self.status_repo.save_index_status(&status).await?;

        info!(
            "Indexing complete: {} indexed, {} unchanged, {} deleted, {} chunks in {:.2}s",
            indexed,
            unchanged,
            deleted,
            status.total_chunks(),
            start_time.elapsed().as_secs_f64()
        );
        Ok(status)
    }

    fn enumerate_files(
        repo_root: &Path,
        include_globs: &[String],
        exclude_globs: &[String],
    ) -> Result<Vec<(String, PathBuf)>, CoreError> {
        let mut overrides = OverrideBuilder::new(repo_root);
        for glob in include_globs {
            overrides
                .add(glob)
                .map_err(|e| CoreError::invalid_argument(format!("Bad include glob {:?}: {}", glob, e)))?;
        }
        for glob in exclude_globs {
            overrides
                .add(&format!("!{}", glob))
                .map_err(|e| CoreError::invalid_argument(format!("Bad exclude glob {:?}: {}", glob, e)))?;
        }
        let overrides = overrides
            .build()
            .map_err(|e| CoreError::invalid_argument(format!("Bad glob set: {}", e)))?;

        let walker = WalkBuilder::new(repo_root)
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .overrides(overrides)
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Error walking repository: {}", e);
                    continue;
                }
            };
            if !entry.path().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(repo_root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            files.push((relative, entry.path().to_path_buf()));
        }
        files.sort();
        Ok(files)
    }

    async fn process_file(
        store: &dyn VectorStore,
        chunker: &dyn Chunker,
        previous: &Option<IndexStatus>,
        relative_path: &str,
        absolute_path: &Path,
    ) -> Result<FileOutcome, CoreError> {
        let bytes = match tokio::fs::read(absolute_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to read {}: {}", relative_path, e);
                return Ok(FileOutcome::Skipped);
            }
        };

        // Unsupported languages still index: the chunker falls back to a
        // single whole-file MODULE chunk for them.
        let language = Language::detect(absolute_path, &bytes);

        let content_hash = compute_content_hash(&bytes);
        if let Some(record) = previous.as_ref().and_then(|p| p.file(relative_path)) {
            if record.content_hash() == content_hash {
                debug!("Unchanged, skipping: {}", relative_path);
                return Ok(FileOutcome::Unchanged(record.clone()));
            }
        }

        let chunks = match chunker.chunk_file(relative_path, &bytes, language) {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!("Failed to chunk {}: {}", relative_path, e);
                return Ok(FileOutcome::Skipped);
            }
        };

        store.replace_file_chunks(relative_path, &chunks).await?;

        let last_modified = tokio::fs::metadata(absolute_path)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or_else(epoch_seconds);

        debug!("Indexed {} chunks from {}", chunks.len(), relative_path);
        Ok(FileOutcome::Indexed(FileRecord::new(
            relative_path.to_string(),
            language,
            bytes.len() as u64,
            last_modified,
            content_hash,
            chunks.len() as u64,
        )))
    }
}
