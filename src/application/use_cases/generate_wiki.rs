use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::application::{
    GenerateRequest, LlmProvider, RetryPolicy, StatusRepository, VectorStore,
};
use crate::domain::{
    epoch_seconds, Chunk, CoreError, EntityRegistry, IndexStatus, Limits, LineRange, WikiPage,
    WikiGenerationStatus, WikiPageStatus,
};

use super::cross_link::weave_cross_links;
use super::search_index::SearchIndexBuilder;
use super::see_also::{apply_see_also, compute_see_also, SeeAlsoOptions};
use super::source_refs::weave_source_refs;

const PAGE_SYSTEM_PROMPT: &str = "\
You are writing one page of a repository wiki. Describe what the code \
does, how its pieces fit together, and anything a newcomer would need to \
know. Write plain markdown with headings; ground every statement in the \
provided code and cite files by path. Do not invent code that is not in \
the context.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    File,
    Module,
    Architecture,
    Index,
}

#[derive(Debug, Clone)]
pub struct PagePlan {
    pub path: String,
    pub title: String,
    pub kind: PageKind,
    pub source_files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct WikiPlanOptions {
    /// Cross-file chunks retrieved per regenerated page.
    pub cross_file_chunks: usize,
    /// Cap on chunks fed into a single page prompt.
    pub max_chunks_per_page: usize,
    /// Size of the curated file subset behind the architecture page.
    pub architecture_files: usize,
    pub see_also: SeeAlsoOptions,
    /// Entity names excluded from cross-linking.
    pub entity_blocklist: Vec<String>,
    /// Per-chunk character budget in page prompts.
    pub chunk_char_budget: usize,
}

impl Default for WikiPlanOptions {
    fn default() -> Self {
        Self {
            cross_file_chunks: 5,
            max_chunks_per_page: 40,
            architecture_files: 25,
            see_also: SeeAlsoOptions::default(),
            entity_blocklist: Vec::new(),
            chunk_char_budget: 1500,
        }
    }
}

/// Dependency-tracked page regenerator.
///
/// Plans one page per source file, one per directory, an architecture
/// overview and an index page. A page is regenerated only when its source
/// hashes or file list changed; otherwise the prior page is loaded from
/// disk with its original timestamp and no LLM call is made.
pub struct GenerateWikiUseCase {
    store: Arc<dyn VectorStore>,
    llm: Arc<dyn LlmProvider>,
    status_repo: Arc<dyn StatusRepository>,
    retry: RetryPolicy,
    deadline: Duration,
}

impl GenerateWikiUseCase {
    pub fn new(
        store: Arc<dyn VectorStore>,
        llm: Arc<dyn LlmProvider>,
        status_repo: Arc<dyn StatusRepository>,
    ) -> Self {
        Self {
            store,
            llm,
            status_repo,
            retry: RetryPolicy::from_limits(&Limits::default()),
            deadline: Duration::from_secs(120),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub async fn execute(
        &self,
        index_status: &IndexStatus,
        output_root: &Path,
        options: &WikiPlanOptions,
    ) -> Result<Vec<WikiPage>, CoreError> {
        let plans = plan_pages(index_status, options);
        let previous = self.status_repo.load_wiki_status().await?;
        info!("Planned {} wiki pages", plans.len());

        let mut pages: Vec<WikiPage> = Vec::new();
        let mut statuses: BTreeMap<String, WikiPageStatus> = BTreeMap::new();
        let mut to_regenerate: Vec<PagePlan> = Vec::new();

        for plan in &plans {
            if needs_regeneration(plan, previous.as_ref(), index_status) {
                to_regenerate.push(plan.clone());
                continue;
            }
            // Reuse: prior content from disk, prior timestamp, no LLM call.
            let prior = previous
                .as_ref()
                .and_then(|p| p.page(&plan.path))
                .cloned();
            let Some(prior) = prior else {
                to_regenerate.push(plan.clone());
                continue;
            };
            match tokio::fs::read_to_string(output_root.join(&plan.path)).await {
                Ok(content) => {
                    debug!("Reusing unchanged page {}", plan.path);
                    pages.push(WikiPage::new(
                        plan.path.clone(),
                        plan.title.clone(),
                        content,
                        prior.generated_at(),
                    ));
                    statuses.insert(plan.path.clone(), prior);
                }
                Err(e) => {
                    debug!("Prior page {} unreadable ({}), regenerating", plan.path, e);
                    to_regenerate.push(plan.clone());
                }
            }
        }

        info!(
            "{} pages reused, {} to regenerate",
            pages.len(),
            to_regenerate.len()
        );

        // Regenerate in parallel, bounded by the provider's own advice.
        let concurrency = self.llm.max_concurrency().max(1);
        let outcomes: Vec<(PagePlan, Result<(WikiPage, WikiPageStatus), CoreError>)> =
            stream::iter(to_regenerate.into_iter())
                .map(|plan| async move {
                    let outcome = self.generate_page(&plan, index_status, options).await;
                    (plan, outcome)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

        let mut failures = 0u64;
        for (plan, outcome) in outcomes {
            match outcome {
                Ok((page, status)) => {
                    pages.push(page);
                    statuses.insert(plan.path.clone(), status);
                }
                Err(e) => {
                    // Contained: the previous version, if any, stays in place.
                    failures += 1;
                    warn!("Page {} failed to generate: {}", plan.path, e);
                    if let Some(prior) = previous.as_ref().and_then(|p| p.page(&plan.path)) {
                        statuses.insert(plan.path.clone(), prior.clone());
                    }
                }
            }
        }
        if failures > 0 {
            warn!("{} pages failed and were skipped", failures);
        }

        pages.sort_by(|a, b| a.path().cmp(b.path()));

        let pages = self
            .post_process(pages, &plans, &statuses, index_status, options)
            .await?;

        for page in &pages {
            let path = output_root.join(page.path());
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, page.content()).await?;
        }

        let search_entries = SearchIndexBuilder::default().build(&pages);
        SearchIndexBuilder::default()
            .write(output_root, &search_entries)
            .await?;

        let status = WikiGenerationStatus::new(
            index_status.repo_path().to_string(),
            epoch_seconds(),
            index_status.status_hash(),
            statuses,
        );
        self.status_repo.save_wiki_status(&status).await?;

        info!("Wiki generation complete: {} pages", pages.len());
        Ok(pages)
    }

    async fn generate_page(
        &self,
        plan: &PagePlan,
        index_status: &IndexStatus,
        options: &WikiPlanOptions,
    ) -> Result<(WikiPage, WikiPageStatus), CoreError> {
        let content = match plan.kind {
            PageKind::Index => render_index_page(index_status),
            _ => {
                let chunks = self.collect_page_chunks(plan, options).await?;
                let prompt = page_prompt(plan, &chunks, options.chunk_char_budget);
                let request = GenerateRequest::new(prompt).with_system(PAGE_SYSTEM_PROMPT);

                let llm = Arc::clone(&self.llm);
                let deadline = self.deadline;
                self.retry
                    .run(|| {
                        let llm = Arc::clone(&llm);
                        let request = request.clone();
                        async move {
                            match tokio::time::timeout(deadline, llm.generate(&request)).await {
                                Ok(result) => result,
                                Err(_) => Err(CoreError::provider_timeout(format!(
                                    "page generation exceeded the {}s deadline",
                                    deadline.as_secs()
                                ))),
                            }
                        }
                    })
                    .await?
            }
        };

        let generated_at = epoch_seconds();
        let page = WikiPage::new(
            plan.path.clone(),
            plan.title.clone(),
            content.clone(),
            generated_at,
        );

        let source_hashes: BTreeMap<String, String> = plan
            .source_files
            .iter()
            .filter_map(|f| {
                index_status
                    .content_hash_of(f)
                    .map(|h| (f.clone(), h.to_string()))
            })
            .collect();

        let mut status = WikiPageStatus::new(
            plan.path.clone(),
            plan.source_files.clone(),
            source_hashes,
            crate::domain::compute_content_hash(content.as_bytes()),
            generated_at,
        );
        if plan.kind == PageKind::File {
            if let Some(line_info) = self.file_line_info(&plan.source_files).await? {
                status = status.with_line_info(line_info);
            }
        }

        Ok((page, status))
    }

    async fn collect_page_chunks(
        &self,
        plan: &PagePlan,
        options: &WikiPlanOptions,
    ) -> Result<Vec<Chunk>, CoreError> {
        let mut chunks: Vec<Chunk> = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();

        for file in &plan.source_files {
            for chunk in self.store.get_chunks_by_file(file).await? {
                if chunks.len() >= options.max_chunks_per_page {
                    break;
                }
                if seen.insert(chunk.id().to_string()) {
                    chunks.push(chunk);
                }
            }
        }

        // Top cross-file context from a short descriptive query. A failed
        // search degrades the prompt, not the page.
        if options.cross_file_chunks > 0 {
            match self
                .store
                .search(&plan.title, options.cross_file_chunks, None)
                .await
            {
                Ok(results) => {
                    for result in results {
                        if chunks.len() >= options.max_chunks_per_page {
                            break;
                        }
                        let chunk = result.into_chunk();
                        if seen.insert(chunk.id().to_string()) {
                            chunks.push(chunk);
                        }
                    }
                }
                Err(e) => debug!("Cross-file retrieval failed for {}: {}", plan.path, e),
            }
        }

        Ok(chunks)
    }

    async fn file_line_info(
        &self,
        source_files: &[String],
    ) -> Result<Option<BTreeMap<String, LineRange>>, CoreError> {
        let mut line_info = BTreeMap::new();
        for file in source_files {
            let chunks = self.store.get_chunks_by_file(file).await?;
            let start = chunks.iter().map(Chunk::start_line).min();
            let end = chunks.iter().map(Chunk::end_line).max();
            if let (Some(start), Some(end)) = (start, end) {
                line_info.insert(file.clone(), LineRange { start, end });
            }
        }
        Ok(if line_info.is_empty() {
            None
        } else {
            Some(line_info)
        })
    }

    /// Registry construction plus the three text weaves, in order:
    /// cross-links, source references, see-also, so later sections are not
    /// rescanned by earlier weavers.
    async fn post_process(
        &self,
        pages: Vec<WikiPage>,
        plans: &[PagePlan],
        statuses: &BTreeMap<String, WikiPageStatus>,
        index_status: &IndexStatus,
        options: &WikiPlanOptions,
    ) -> Result<Vec<WikiPage>, CoreError> {
        let file_pages: BTreeMap<String, String> = plans
            .iter()
            .filter(|p| p.kind == PageKind::File)
            .filter_map(|p| p.source_files.first().map(|f| (f.clone(), p.path.clone())))
            .collect();

        let mut registry = EntityRegistry::with_blocklist(options.entity_blocklist.clone());
        for file in index_status.files().keys() {
            let Some(wiki_path) = file_pages.get(file) else {
                continue;
            };
            for chunk in self.store.get_chunks_by_file(file).await? {
                if let Some(name) = chunk.name() {
                    registry.register(name, chunk.kind(), wiki_path.clone(), file.clone());
                }
            }
        }
        debug!("Entity registry holds {} entities", registry.len());

        let plan_by_path: BTreeMap<&str, &PagePlan> =
            plans.iter().map(|p| (p.path.as_str(), p)).collect();

        let mut woven: Vec<WikiPage> = Vec::with_capacity(pages.len());
        for page in pages {
            let mut page = weave_cross_links(&page, &registry);
            let Some(plan) = plan_by_path.get(page.path()) else {
                woven.push(page);
                continue;
            };
            if plan.kind != PageKind::Index {
                let line_info = statuses.get(page.path()).and_then(|s| s.line_info()).cloned();
                page = weave_source_refs(
                    &page,
                    &plan.source_files,
                    line_info.as_ref(),
                    &file_pages,
                );
            }
            woven.push(page);
        }

        // See-also links run over every non-index page's dependency list.
        let see_also_input: Vec<(String, String, Vec<String>)> = woven
            .iter()
            .filter(|page| {
                plan_by_path
                    .get(page.path())
                    .map_or(false, |p| p.kind != PageKind::Index)
            })
            .map(|page| {
                let sources = plan_by_path
                    .get(page.path())
                    .map(|p| p.source_files.clone())
                    .unwrap_or_default();
                (page.path().to_string(), page.title().to_string(), sources)
            })
            .collect();
        let see_also = compute_see_also(&see_also_input, &options.see_also);

        Ok(woven
            .into_iter()
            .map(|page| {
                let is_index = plan_by_path
                    .get(page.path())
                    .map_or(false, |p| p.kind == PageKind::Index);
                if is_index {
                    return page;
                }
                match see_also.get(page.path()) {
                    Some(links) => apply_see_also(&page, links),
                    None => apply_see_also(&page, &[]),
                }
            })
            .collect())
    }
}

/// One file page per source file, one module page per directory containing
/// source files, an architecture overview and an index page.
pub fn plan_pages(index_status: &IndexStatus, options: &WikiPlanOptions) -> Vec<PagePlan> {
    let mut plans = Vec::new();
    let mut directories: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for path in index_status.files().keys() {
        plans.push(PagePlan {
            path: file_page_path(path),
            title: path.clone(),
            kind: PageKind::File,
            source_files: vec![path.clone()],
        });

        let directory = match path.rsplit_once('/') {
            Some((dir, _)) => dir.to_string(),
            None => "root".to_string(),
        };
        directories.entry(directory).or_default().push(path.clone());
    }

    for (directory, mut files) in directories {
        files.sort();
        plans.push(PagePlan {
            path: format!("modules/{}.md", directory),
            title: format!("Module {}", directory),
            kind: PageKind::Module,
            source_files: files,
        });
    }

    // Architecture: a curated subset, the chunk-richest files first.
    let mut ranked: Vec<(&String, u64)> = index_status
        .files()
        .iter()
        .map(|(path, record)| (path, record.chunk_count()))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let mut architecture_files: Vec<String> = ranked
        .into_iter()
        .take(options.architecture_files)
        .map(|(path, _)| path.clone())
        .collect();
    architecture_files.sort();
    plans.push(PagePlan {
        path: "architecture.md".to_string(),
        title: "Architecture Overview".to_string(),
        kind: PageKind::Architecture,
        source_files: architecture_files,
    });

    let mut all_files: Vec<String> = index_status.files().keys().cloned().collect();
    all_files.sort();
    plans.push(PagePlan {
        path: "index.md".to_string(),
        title: "Index".to_string(),
        kind: PageKind::Index,
        source_files: all_files,
    });

    plans
}

pub fn file_page_path(source_path: &str) -> String {
    format!("files/{}.md", source_path)
}

/// A page must be regenerated when no previous status exists, its path is
/// new, its hash union changed, or its ordered file list changed.
fn needs_regeneration(
    plan: &PagePlan,
    previous: Option<&WikiGenerationStatus>,
    index_status: &IndexStatus,
) -> bool {
    let Some(previous) = previous else {
        return true;
    };
    let Some(entry) = previous.page(&plan.path) else {
        return true;
    };
    if entry.source_files() != plan.source_files.as_slice() {
        return true;
    }
    let current: BTreeMap<String, String> = plan
        .source_files
        .iter()
        .filter_map(|f| {
            index_status
                .content_hash_of(f)
                .map(|h| (f.clone(), h.to_string()))
        })
        .collect();
    current != *entry.source_hashes()
}

fn page_prompt(plan: &PagePlan, chunks: &[Chunk], char_budget: usize) -> String {
    let mut context = String::new();
    for chunk in chunks {
        let body: String = chunk.content().chars().take(char_budget).collect();
        context.push_str(&format!("### {}\n```\n{}\n```\n\n", chunk.location(), body));
    }
    if context.is_empty() {
        context.push_str("(no code context available)\n\n");
    }

    let focus = match plan.kind {
        PageKind::File => "Explain this file: its purpose, its declarations and how they interact.",
        PageKind::Module => {
            "Explain this directory as a module: what it is responsible for and how its files relate."
        }
        PageKind::Architecture => {
            "Give an architecture overview of the repository: major components, data flow and boundaries."
        }
        PageKind::Index => "",
    };

    format!(
        "Write the wiki page \"{}\".\n{}\n\nSource files: {}\n\nCode context:\n\n{}",
        plan.title,
        focus,
        plan.source_files.join(", "),
        context
    )
}

/// The index page is a deterministic listing; no LLM call is involved.
fn render_index_page(index_status: &IndexStatus) -> String {
    let mut out = String::from("# Index\n\n");
    out.push_str(&format!(
        "Repository: `{}` ({} files, {} chunks)\n\n",
        index_status.repo_path(),
        index_status.total_files(),
        index_status.total_chunks()
    ));

    out.push_str("## Pages\n\n- [Architecture Overview](architecture.md)\n\n## Files\n\n");
    for path in index_status.files().keys() {
        out.push_str(&format!("- [{}]({})\n", path, file_page_path(path)));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FileRecord, Language};

    fn index_status() -> IndexStatus {
        let mut status = IndexStatus::new("/repo".to_string(), 1);
        for (path, chunks) in [("src/a.rs", 5), ("src/b.rs", 3), ("README.md", 1)] {
            status.record_file(FileRecord::new(
                path.to_string(),
                Language::Rust,
                10,
                1,
                format!("hash-{}", path),
                chunks,
            ));
        }
        status
    }

    #[test]
    fn test_plan_covers_files_modules_architecture_index() {
        let plans = plan_pages(&index_status(), &WikiPlanOptions::default());

        let file_pages = plans.iter().filter(|p| p.kind == PageKind::File).count();
        assert_eq!(file_pages, 3);
        assert!(plans
            .iter()
            .any(|p| p.kind == PageKind::Module && p.path == "modules/src.md"));
        assert!(plans
            .iter()
            .any(|p| p.kind == PageKind::Module && p.path == "modules/root.md"));
        assert!(plans.iter().any(|p| p.path == "architecture.md"));
        assert!(plans.iter().any(|p| p.path == "index.md"));
    }

    #[test]
    fn test_module_pages_carry_ordered_sources() {
        let plans = plan_pages(&index_status(), &WikiPlanOptions::default());
        let module = plans
            .iter()
            .find(|p| p.path == "modules/src.md")
            .unwrap();
        assert_eq!(module.source_files, vec!["src/a.rs", "src/b.rs"]);
    }

    #[test]
    fn test_needs_regeneration_rules() {
        let status = index_status();
        let plans = plan_pages(&status, &WikiPlanOptions::default());
        let plan = plans.iter().find(|p| p.path == "files/src/a.rs.md").unwrap();

        // No previous status at all.
        assert!(needs_regeneration(plan, None, &status));

        let matching_entry = WikiPageStatus::new(
            plan.path.clone(),
            plan.source_files.clone(),
            BTreeMap::from([("src/a.rs".to_string(), "hash-src/a.rs".to_string())]),
            "content".to_string(),
            42,
        );
        let previous = WikiGenerationStatus::new(
            "/repo".to_string(),
            42,
            "idx".to_string(),
            BTreeMap::from([(plan.path.clone(), matching_entry)]),
        );
        assert!(!needs_regeneration(plan, Some(&previous), &status));

        // Same path but a stale hash.
        let stale_entry = WikiPageStatus::new(
            plan.path.clone(),
            plan.source_files.clone(),
            BTreeMap::from([("src/a.rs".to_string(), "old".to_string())]),
            "content".to_string(),
            42,
        );
        let stale = WikiGenerationStatus::new(
            "/repo".to_string(),
            42,
            "idx".to_string(),
            BTreeMap::from([(plan.path.clone(), stale_entry)]),
        );
        assert!(needs_regeneration(plan, Some(&stale), &status));
    }

    #[test]
    fn test_index_page_lists_files() {
        let rendered = render_index_page(&index_status());
        assert!(rendered.contains("[src/a.rs](files/src/a.rs.md)"));
        assert!(rendered.contains("[architecture.md]") || rendered.contains("(architecture.md)"));
    }
}
