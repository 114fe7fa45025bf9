use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::application::loose_json::{extract_json, list_under, string_field};
use crate::application::{GenerateRequest, LlmProvider, RetryPolicy, VectorStore};
use crate::domain::{
    CancellationToken, CoreError, Limits, ProgressPayload, QuestionCategory, ResearchOptions,
    ResearchProgress, ResearchResult, ResearchStep, SearchResult, StepRecord, SubQuestion,
};

/// Receives progress events from a research run. Must not block for long;
/// delivery happens inline from the pipeline's task.
pub type ProgressSink = Arc<dyn Fn(ResearchProgress) + Send + Sync>;

const DECOMPOSITION_SYSTEM_PROMPT: &str = "\
You are a code research planner. Break the user's question about a code \
repository into focused sub-questions that can each be answered by \
searching the codebase.

Rules:
1. Return ONLY a JSON object of the form \
   {\"sub_questions\": [{\"question\": \"...\", \"category\": \"...\", \"rationale\": \"...\"}]} \
   with no prose, no markdown, no code fences.
2. Use at most the number of sub-questions the user asks for.
3. category must be one of IMPLEMENTATION, ARCHITECTURE, USAGE, \
   INTEGRATION, EDGE_CASES.
4. Each sub-question must be self-contained and concrete.";

const GAP_ANALYSIS_SYSTEM_PROMPT: &str = "\
You are reviewing retrieved code snippets for coverage of a question. \
Identify what the snippets do NOT cover and produce follow-up search \
queries for the gaps.

Rules:
1. Return ONLY a JSON object of the form {\"follow_up_queries\": [\"...\"]} \
   with no prose, no markdown, no code fences.
2. Return an empty list when coverage is already sufficient.
3. Queries must be short keyword phrases suited to semantic code search.";

const SYNTHESIS_SYSTEM_PROMPT: &str = "\
You are a senior engineer answering a question about a code repository. \
Ground every claim in the provided code snippets and cite them by their \
file:line references. If the context contains no relevant code, say so \
plainly instead of inventing citations.";

/// Multi-step research pipeline over the vector store.
///
/// A linear state machine: DECOMPOSITION, RETRIEVAL, GAP_ANALYSIS, an
/// optional REFINED_RETRIEVAL, then SYNTHESIS. The cancellation token is
/// probed at every step boundary and before each LLM call; an LLM-call
/// counter enforces the per-run budget.
pub struct DeepResearchUseCase {
    store: Arc<dyn VectorStore>,
    llm: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
    limits: Limits,
    workers: usize,
    deadline: Duration,
}

impl DeepResearchUseCase {
    pub fn new(store: Arc<dyn VectorStore>, llm: Arc<dyn LlmProvider>) -> Self {
        let limits = Limits::default();
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            store,
            llm,
            retry: RetryPolicy::from_limits(&limits),
            limits,
            workers: cpu_count.min(4),
            deadline: Duration::from_secs(120),
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.retry = RetryPolicy::from_limits(&limits);
        self.limits = limits;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.workers = workers.clamp(1, cpu_count);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub async fn execute(
        &self,
        question: &str,
        options: ResearchOptions,
        progress_sink: Option<ProgressSink>,
        cancellation: Option<CancellationToken>,
    ) -> Result<ResearchResult, CoreError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(CoreError::invalid_argument("question must not be empty"));
        }
        let options = options.clamped(&self.limits);
        info!("Researching: {}", question);

        let mut run = ResearchRun {
            pipeline: self,
            options,
            sink: progress_sink,
            cancellation,
            step_number: 0,
            llm_calls: 0,
            trace: Vec::new(),
        };

        // DECOMPOSITION
        run.check_cancelled(ResearchStep::Decomposition)?;
        let number = run.enter_step();
        let started = Instant::now();
        let request = GenerateRequest::new(format!(
            "Question about the repository:\n{}\n\nProduce at most {} sub-questions.",
            question, run.options.max_sub_questions
        ))
        .with_system(DECOMPOSITION_SYSTEM_PROMPT)
        .with_temperature(0.0);
        let response = run.llm_call(ResearchStep::Decomposition, &request).await?;

        let mut sub_questions = parse_sub_questions(&response);
        if sub_questions.is_empty() {
            debug!("Decomposition response unparseable, falling back to the original question");
            sub_questions = vec![SubQuestion::new(question, QuestionCategory::Implementation)];
        }
        sub_questions.truncate(run.options.max_sub_questions);

        run.finish_step(
            ResearchStep::Decomposition,
            number,
            started,
            ProgressPayload::SubQuestions(sub_questions.clone()),
            format!("decomposed into {} sub-questions", sub_questions.len()),
        );

        // RETRIEVAL
        run.check_cancelled(ResearchStep::Retrieval)?;
        let number = run.enter_step();
        let started = Instant::now();
        let mut aggregate: HashMap<String, SearchResult> = HashMap::new();
        let queries: Vec<String> = sub_questions
            .iter()
            .map(|sq| sq.question().to_string())
            .collect();
        let retrieved = self
            .run_searches(
                queries,
                run.options.max_chunks_per_sub_question,
                &mut aggregate,
            )
            .await?;
        run.finish_step(
            ResearchStep::Retrieval,
            number,
            started,
            ProgressPayload::ChunkCounts {
                retrieved,
                aggregate: aggregate.len(),
            },
            format!("retrieved {} chunks ({} unique)", retrieved, aggregate.len()),
        );

        // GAP_ANALYSIS
        run.check_cancelled(ResearchStep::GapAnalysis)?;
        let number = run.enter_step();
        let started = Instant::now();
        let request = GenerateRequest::new(gap_analysis_prompt(
            question,
            &sub_questions,
            &aggregate,
            run.options.max_follow_ups,
        ))
        .with_system(GAP_ANALYSIS_SYSTEM_PROMPT)
        .with_temperature(0.0);
        let response = run.llm_call(ResearchStep::GapAnalysis, &request).await?;

        let mut follow_ups = parse_follow_ups(&response);
        follow_ups.truncate(run.options.max_follow_ups);
        run.finish_step(
            ResearchStep::GapAnalysis,
            number,
            started,
            ProgressPayload::FollowUps(follow_ups.clone()),
            format!("{} follow-up queries", follow_ups.len()),
        );

        // REFINED_RETRIEVAL, entered only when there is something to refine.
        if !follow_ups.is_empty() {
            run.check_cancelled(ResearchStep::RefinedRetrieval)?;
            let number = run.enter_step();
            let started = Instant::now();
            let retrieved = self
                .run_searches(
                    follow_ups.clone(),
                    run.options.max_chunks_per_sub_question,
                    &mut aggregate,
                )
                .await?;
            run.finish_step(
                ResearchStep::RefinedRetrieval,
                number,
                started,
                ProgressPayload::ChunkCounts {
                    retrieved,
                    aggregate: aggregate.len(),
                },
                format!(
                    "retrieved {} more chunks ({} unique)",
                    retrieved,
                    aggregate.len()
                ),
            );
        }

        // SYNTHESIS
        run.check_cancelled(ResearchStep::Synthesis)?;
        let number = run.enter_step();
        let started = Instant::now();
        let context_chunks = best_chunks(&aggregate, run.options.max_context_chunks);
        let request = GenerateRequest::new(synthesis_prompt(
            question,
            &context_chunks,
            run.options.chunk_char_budget,
        ))
        .with_system(SYNTHESIS_SYSTEM_PROMPT);
        let answer = run.llm_call(ResearchStep::Synthesis, &request).await?;
        run.finish_step(
            ResearchStep::Synthesis,
            number,
            started,
            ProgressPayload::Text(format!(
                "synthesised answer from {} chunks",
                context_chunks.len()
            )),
            format!("synthesised from {} context chunks", context_chunks.len()),
        );

        let llm_calls = run.llm_calls;
        info!(
            "Research complete: {} unique chunks, {} llm calls",
            aggregate.len(),
            llm_calls
        );
        Ok(ResearchResult::new(
            answer,
            run.trace,
            sub_questions,
            aggregate.len(),
            llm_calls,
        ))
    }

    /// Fan the queries out over the worker pool and merge results into the
    /// aggregate by chunk id, keeping the maximum score per chunk.
    async fn run_searches(
        &self,
        queries: Vec<String>,
        limit: usize,
        aggregate: &mut HashMap<String, SearchResult>,
    ) -> Result<usize, CoreError> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut join_set: JoinSet<Result<Vec<SearchResult>, CoreError>> = JoinSet::new();

        for query in queries {
            let store = Arc::clone(&self.store);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| CoreError::storage(format!("Worker pool closed: {}", e)))?;
                store.search(&query, limit, None).await
            });
        }

        let mut retrieved = 0;
        while let Some(joined) = join_set.join_next().await {
            let results = joined
                .map_err(|e| CoreError::storage(format!("Retrieval worker failed: {}", e)))??;
            retrieved += results.len();
            for result in results {
                let id = result.chunk().id().to_string();
                match aggregate.get(&id) {
                    Some(existing) if existing.score() >= result.score() => {}
                    _ => {
                        aggregate.insert(id, result);
                    }
                }
            }
        }
        Ok(retrieved)
    }
}

struct ResearchRun<'a> {
    pipeline: &'a DeepResearchUseCase,
    options: ResearchOptions,
    sink: Option<ProgressSink>,
    cancellation: Option<CancellationToken>,
    step_number: u32,
    llm_calls: u32,
    trace: Vec<StepRecord>,
}

impl ResearchRun<'_> {
    fn enter_step(&mut self) -> u32 {
        self.step_number += 1;
        self.step_number
    }

    fn emit(&self, progress: ResearchProgress) {
        if let Some(sink) = &self.sink {
            sink(progress);
        }
    }

    fn finish_step(
        &mut self,
        step: ResearchStep,
        number: u32,
        started: Instant,
        payload: ProgressPayload,
        summary: String,
    ) {
        let duration_ms = started.elapsed().as_millis() as u64;
        self.emit(ResearchProgress::new(step, number, duration_ms, payload));
        self.trace
            .push(StepRecord::new(step, number, duration_ms, summary));
    }

    /// Probe the cancellation token. On observation, a CANCELLED progress
    /// event naming the step is emitted and the run fails; no further
    /// provider calls happen afterwards.
    fn check_cancelled(&mut self, at_step: ResearchStep) -> Result<(), CoreError> {
        let cancelled = self
            .cancellation
            .as_ref()
            .map(CancellationToken::is_cancelled)
            .unwrap_or(false);
        if !cancelled {
            return Ok(());
        }
        let number = self.enter_step();
        self.emit(ResearchProgress::new(
            ResearchStep::Cancelled,
            number,
            0,
            ProgressPayload::Text(format!("cancelled before {}", at_step)),
        ));
        self.trace.push(StepRecord::new(
            ResearchStep::Cancelled,
            number,
            0,
            format!("cancelled before {}", at_step),
        ));
        warn!("Research cancelled at {}", at_step);
        Err(CoreError::ResearchCancelled { step: at_step })
    }

    async fn llm_call(
        &mut self,
        step: ResearchStep,
        request: &GenerateRequest,
    ) -> Result<String, CoreError> {
        self.check_cancelled(step)?;
        if self.llm_calls >= self.options.llm_call_cap {
            return Err(CoreError::budget_exceeded(format!(
                "llm call cap of {} reached at {}",
                self.options.llm_call_cap, step
            )));
        }
        self.llm_calls += 1;

        let llm = Arc::clone(&self.pipeline.llm);
        let deadline = self.pipeline.deadline;
        self.pipeline
            .retry
            .run(|| {
                let llm = Arc::clone(&llm);
                async move {
                    match tokio::time::timeout(deadline, llm.generate(request)).await {
                        Ok(result) => result,
                        Err(_) => Err(CoreError::provider_timeout(format!(
                            "generate exceeded the {}s deadline",
                            deadline.as_secs()
                        ))),
                    }
                }
            })
            .await
    }
}

/// Lenient parse of the decomposition response. Accepts an object with a
/// `sub_questions` array or a bare array; items may be objects or plain
/// strings. Anything unparseable yields an empty list so the caller can
/// fall back to the original question.
fn parse_sub_questions(text: &str) -> Vec<SubQuestion> {
    let value = match extract_json(text) {
        Some(value) => value,
        None => return Vec::new(),
    };

    list_under(&value, &["sub_questions", "questions"])
        .into_iter()
        .filter_map(|item| {
            if let Some(question) = item.as_str() {
                let question = question.trim();
                if question.is_empty() {
                    return None;
                }
                return Some(SubQuestion::new(question, QuestionCategory::Implementation));
            }
            let question = string_field(item, "question")?;
            let category = item
                .get("category")
                .and_then(serde_json::Value::as_str)
                .map(QuestionCategory::parse)
                .unwrap_or(QuestionCategory::Implementation);
            let mut sub_question = SubQuestion::new(question, category);
            if let Some(rationale) = string_field(item, "rationale") {
                sub_question = sub_question.with_rationale(rationale);
            }
            Some(sub_question)
        })
        .collect()
}

/// Invalid JSON yields zero follow-ups; the pipeline then proceeds
/// straight to synthesis.
fn parse_follow_ups(text: &str) -> Vec<String> {
    let value = match extract_json(text) {
        Some(value) => value,
        None => return Vec::new(),
    };

    list_under(&value, &["follow_up_queries", "follow_ups", "queries"])
        .into_iter()
        .filter_map(|item| {
            if let Some(query) = item.as_str() {
                let query = query.trim();
                return if query.is_empty() {
                    None
                } else {
                    Some(query.to_string())
                };
            }
            string_field(item, "query").or_else(|| string_field(item, "question"))
        })
        .collect()
}

/// Order the aggregate by score descending (ties by id ascending) and keep
/// the best `limit` chunks.
fn best_chunks(aggregate: &HashMap<String, SearchResult>, limit: usize) -> Vec<&SearchResult> {
    let mut results: Vec<&SearchResult> = aggregate.values().collect();
    results.sort_by(|a, b| {
        b.score()
            .partial_cmp(&a.score())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk().id().cmp(b.chunk().id()))
    });
    results.truncate(limit);
    results
}

fn gap_analysis_prompt(
    question: &str,
    sub_questions: &[SubQuestion],
    aggregate: &HashMap<String, SearchResult>,
    max_follow_ups: usize,
) -> String {
    let mut locations: Vec<String> = aggregate
        .values()
        .map(|r| r.chunk().location())
        .collect();
    locations.sort();
    locations.truncate(40);

    let sub_question_lines: Vec<String> = sub_questions
        .iter()
        .map(|sq| format!("- [{}] {}", sq.category().as_str(), sq.question()))
        .collect();

    format!(
        "Original question:\n{}\n\nSub-questions searched:\n{}\n\n\
         Code locations retrieved so far:\n{}\n\n\
         Produce at most {} follow-up queries for uncovered aspects.",
        question,
        sub_question_lines.join("\n"),
        if locations.is_empty() {
            "(none)".to_string()
        } else {
            locations.join("\n")
        },
        max_follow_ups
    )
}

fn synthesis_prompt(question: &str, chunks: &[&SearchResult], char_budget: usize) -> String {
    if chunks.is_empty() {
        return format!(
            "Question:\n{}\n\nNo matching code was found in the repository index. \
             State clearly that no relevant code was found; do not invent file \
             references or behaviour.",
            question
        );
    }

    let mut context = String::new();
    for result in chunks {
        let chunk = result.chunk();
        let body: String = chunk.content().chars().take(char_budget).collect();
        context.push_str(&format!("### {}\n{}\n\n", chunk.location(), body));
    }
    format!(
        "Question:\n{}\n\nCode context:\n\n{}Answer the question using only \
         the context above, citing file:line locations.",
        question, context
    )
}
