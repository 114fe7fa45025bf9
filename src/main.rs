//! RepoWiki CLI - repository indexing, search, research and wiki generation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use repowiki::{
    DeepResearchUseCase, DuckdbVectorStore, EmbeddingProvider, GenerateWikiUseCase,
    IndexRepositoryUseCase, JsonStatusRepository, LlmProvider, MockEmbeddingProvider,
    MockLlmProvider, OllamaEmbeddingProvider, OllamaLlmProvider, ProgressSink, ResearchOptions,
    SearchFilters, StatusRepository, TreeSitterChunker, VectorStore, WikiPlanOptions,
};

/// RepoWiki - grounded repository wiki and deep research
#[derive(Parser)]
#[command(name = "repowiki")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the cache directory
    #[arg(short, long, global = true, default_value = ".repowiki")]
    data_dir: PathBuf,

    /// Use deterministic mock providers instead of a local Ollama server
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a code repository
    Index {
        /// Path to the repository to index
        path: PathBuf,

        /// Include globs (all files when empty)
        #[arg(short, long)]
        include: Vec<String>,

        /// Exclude globs
        #[arg(short, long)]
        exclude: Vec<String>,

        /// Worker pool size
        #[arg(short, long, default_value = "4")]
        workers: usize,
    },

    /// Search indexed chunks
    Search {
        /// The search query
        query: String,

        /// Maximum number of results
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Filter by language
        #[arg(short = 'L', long)]
        language: Option<String>,

        /// Filter by chunk kind
        #[arg(short, long)]
        kind: Option<String>,

        /// Minimum similarity score
        #[arg(short, long)]
        min_score: Option<f32>,
    },

    /// Answer a question with the deep-research pipeline
    Research {
        /// The question to research
        question: String,

        /// Maximum sub-questions in decomposition
        #[arg(long, default_value = "5")]
        max_sub_questions: usize,
    },

    /// Generate or refresh the wiki
    Wiki {
        /// Output directory for the markdown tree
        #[arg(short, long, default_value = "wiki")]
        output: PathBuf,
    },

    /// Show store statistics
    Stats,
}

fn embedding_provider(cli: &Cli) -> Arc<dyn EmbeddingProvider> {
    if cli.mock {
        Arc::new(MockEmbeddingProvider::new())
    } else {
        Arc::new(OllamaEmbeddingProvider::from_env())
    }
}

fn llm_provider(cli: &Cli) -> Arc<dyn LlmProvider> {
    if cli.mock {
        Arc::new(MockLlmProvider::new())
    } else {
        Arc::new(OllamaLlmProvider::from_env())
    }
}

fn open_store(cli: &Cli) -> Result<Arc<dyn VectorStore>> {
    std::fs::create_dir_all(&cli.data_dir)
        .with_context(|| format!("creating {}", cli.data_dir.display()))?;
    let store = DuckdbVectorStore::new(&cli.data_dir.join("chunks.duckdb"), embedding_provider(cli))
        .context("opening vector store")?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("repowiki=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("repowiki=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let status_repo = Arc::new(JsonStatusRepository::new(cli.data_dir.clone()));

    match &cli.command {
        Commands::Index {
            path,
            include,
            exclude,
            workers,
        } => {
            let store = open_store(&cli)?;
            let use_case = IndexRepositoryUseCase::new(
                store,
                Arc::new(TreeSitterChunker::new()),
                status_repo,
                *workers,
            );
            let status = use_case.execute(path, include, exclude).await?;
            println!(
                "Indexed {} files, {} chunks",
                status.total_files(),
                status.total_chunks()
            );
            for (language, count) in status.languages() {
                println!("  {}: {} files", language, count);
            }
        }

        Commands::Search {
            query,
            limit,
            language,
            kind,
            min_score,
        } => {
            let store = open_store(&cli)?;
            let mut filters = SearchFilters::default();
            if let Some(language) = language {
                filters = filters.with_language(language.as_str());
            }
            if let Some(kind) = kind {
                filters = filters.with_kind(kind.as_str());
            }
            if let Some(min_score) = min_score {
                filters = filters.with_score_threshold(*min_score);
            }
            let filters = if filters.is_empty() { None } else { Some(filters) };

            let results = store.search(query, *limit, filters.as_ref()).await?;
            if results.is_empty() {
                println!("No results.");
            }
            for result in results {
                println!("{}", result.display_line());
                if let Some(name) = result.chunk().name() {
                    println!("  {} {}", result.chunk().kind(), name);
                }
            }
        }

        Commands::Research {
            question,
            max_sub_questions,
        } => {
            let store = open_store(&cli)?;
            let pipeline = DeepResearchUseCase::new(store, llm_provider(&cli));
            let options = ResearchOptions {
                max_sub_questions: *max_sub_questions,
                ..Default::default()
            };
            let sink: ProgressSink = Arc::new(|progress| {
                info!(
                    "[step {}] {} ({} ms)",
                    progress.step_number(),
                    progress.step(),
                    progress.duration_ms()
                );
            });
            let result = pipeline
                .execute(question, options, Some(sink), None)
                .await?;

            println!("{}", result.answer());
            println!();
            println!(
                "({} chunks consulted, {} llm calls)",
                result.total_chunks_retrieved(),
                result.llm_calls()
            );
        }

        Commands::Wiki { output } => {
            let store = open_store(&cli)?;
            let index_status = status_repo
                .load_index_status()
                .await?
                .context("no index status found; run `repowiki index` first")?;
            let use_case = GenerateWikiUseCase::new(store, llm_provider(&cli), status_repo);
            let pages = use_case
                .execute(&index_status, output, &WikiPlanOptions::default())
                .await?;
            println!("Generated {} pages under {}", pages.len(), output.display());
        }

        Commands::Stats => {
            let store = open_store(&cli)?;
            let stats = store.get_stats().await?;
            println!("Total chunks: {}", stats.total_chunks);
            for (language, count) in &stats.languages {
                println!("  {}: {}", language, count);
            }
        }
    }

    Ok(())
}
