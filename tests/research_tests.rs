//! Deep-research pipeline tests: cancellation, budgets, progress ordering
//! and the lenient-parse fallbacks, all against scripted providers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use repowiki::{
    CancellationToken, Chunk, ChunkKind, CoreError, DeepResearchUseCase, Language,
    MemoryVectorStore, MockEmbeddingProvider, MockLlmProvider, ProgressSink, ResearchOptions,
    ResearchProgress, ResearchStep, RetryPolicy, VectorStore,
};

fn chunk(file_path: &str, name: &str) -> Chunk {
    Chunk::new(
        file_path.to_string(),
        format!("fn {}() {{ /* implementation of {} */ }}", name, name),
        1,
        3,
        Language::Rust,
        ChunkKind::Function,
    )
    .with_name(name)
}

async fn seeded_store() -> Arc<MemoryVectorStore> {
    let store = Arc::new(MemoryVectorStore::new(Arc::new(
        MockEmbeddingProvider::with_dimension(16),
    )));
    store
        .add_chunks(&[
            chunk("src/retry.rs", "retry_with_backoff"),
            chunk("src/store.rs", "search_chunks"),
            chunk("src/chunker.rs", "chunk_file"),
        ])
        .await
        .unwrap();
    store
}

fn recording_sink() -> (ProgressSink, Arc<Mutex<Vec<ResearchProgress>>>) {
    let events: Arc<Mutex<Vec<ResearchProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&events);
    let sink: ProgressSink = Arc::new(move |progress| {
        captured.lock().unwrap().push(progress);
    });
    (sink, events)
}

const DECOMPOSITION_JSON: &str = r#"{"sub_questions": [
    {"question": "How is retry implemented?", "category": "IMPLEMENTATION"},
    {"question": "How does search rank results?", "category": "ARCHITECTURE"}
]}"#;

#[tokio::test]
async fn test_full_pipeline_happy_path() {
    let store = seeded_store().await;
    let llm = Arc::new(MockLlmProvider::new());
    llm.push_response(DECOMPOSITION_JSON);
    llm.push_response(r#"{"follow_up_queries": ["backoff jitter"]}"#);
    llm.push_response("The retry policy uses exponential backoff.");

    let (sink, events) = recording_sink();
    let pipeline = DeepResearchUseCase::new(store, llm.clone());
    let result = pipeline
        .execute("How does retry work?", ResearchOptions::default(), Some(sink), None)
        .await
        .unwrap();

    assert_eq!(result.answer(), "The retry policy uses exponential backoff.");
    assert_eq!(result.llm_calls(), 3);
    assert_eq!(result.sub_questions().len(), 2);
    assert!(result.total_chunks_retrieved() > 0);

    let steps: Vec<ResearchStep> = events.lock().unwrap().iter().map(|e| e.step()).collect();
    assert_eq!(
        steps,
        vec![
            ResearchStep::Decomposition,
            ResearchStep::Retrieval,
            ResearchStep::GapAnalysis,
            ResearchStep::RefinedRetrieval,
            ResearchStep::Synthesis,
        ]
    );

    // Progress monotonicity: strictly increasing step numbers.
    let numbers: Vec<u32> = events.lock().unwrap().iter().map(|e| e.step_number()).collect();
    for pair in numbers.windows(2) {
        assert!(pair[0] < pair[1]);
    }

    // The reasoning trace mirrors the executed steps.
    assert_eq!(result.reasoning_trace().len(), 5);
    assert_eq!(result.reasoning_trace()[0].step(), ResearchStep::Decomposition);
}

#[tokio::test]
async fn test_cancellation_after_decomposition() {
    let store = seeded_store().await;
    let llm = Arc::new(MockLlmProvider::new());
    llm.push_response(DECOMPOSITION_JSON);

    let token = CancellationToken::new();
    let events: Arc<Mutex<Vec<ResearchProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&events);
    // Flip the token as soon as the decomposition event lands, which is
    // after its single LLM call and before the retrieval boundary probe.
    let flip = token.clone();
    let sink: ProgressSink = Arc::new(move |progress| {
        if progress.step() == ResearchStep::Decomposition {
            flip.cancel();
        }
        captured.lock().unwrap().push(progress);
    });

    let pipeline = DeepResearchUseCase::new(store, llm.clone());
    let err = pipeline
        .execute(
            "How does retry work?",
            ResearchOptions::default(),
            Some(sink),
            Some(token),
        )
        .await
        .unwrap_err();

    match err {
        CoreError::ResearchCancelled { step } => assert_eq!(step, ResearchStep::Retrieval),
        other => panic!("expected ResearchCancelled, got {:?}", other),
    }

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 2, "exactly DECOMPOSITION then CANCELLED");
    assert_eq!(events[0].step(), ResearchStep::Decomposition);
    assert_eq!(events[1].step(), ResearchStep::Cancelled);
    assert!(events[0].step_number() < events[1].step_number());

    assert_eq!(llm.call_count(), 1, "no provider calls after cancellation");
}

#[tokio::test]
async fn test_cancellation_before_any_call() {
    let store = seeded_store().await;
    let llm = Arc::new(MockLlmProvider::new());
    let token = CancellationToken::new();
    token.cancel();

    let (sink, events) = recording_sink();
    let pipeline = DeepResearchUseCase::new(store, llm.clone());
    let err = pipeline
        .execute(
            "anything",
            ResearchOptions::default(),
            Some(sink),
            Some(token),
        )
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(llm.call_count(), 0);
    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].step(), ResearchStep::Cancelled);
}

#[tokio::test]
async fn test_budget_exceeded() {
    let store = seeded_store().await;
    let llm = Arc::new(MockLlmProvider::new());
    llm.push_response(DECOMPOSITION_JSON);

    let options = ResearchOptions {
        llm_call_cap: 1,
        ..Default::default()
    };
    let pipeline = DeepResearchUseCase::new(store, llm.clone());
    let err = pipeline
        .execute("How does retry work?", options, None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::BudgetExceeded(_)));
    assert_eq!(llm.call_count(), 1, "the cap stops the gap-analysis call");
}

#[tokio::test]
async fn test_decomposition_fallback_on_garbage() {
    let store = seeded_store().await;
    let llm = Arc::new(MockLlmProvider::new());
    llm.push_response("I cannot produce JSON today.");
    llm.push_response("also not json");
    llm.push_response("Answer text.");

    let pipeline = DeepResearchUseCase::new(store, llm.clone());
    let result = pipeline
        .execute("where is the chunker?", ResearchOptions::default(), None, None)
        .await
        .unwrap();

    // Falls back to a single sub-question equal to the original.
    assert_eq!(result.sub_questions().len(), 1);
    assert_eq!(result.sub_questions()[0].question(), "where is the chunker?");
    // Invalid gap-analysis JSON yields zero follow-ups, so the refined
    // retrieval step is skipped: decomposition, gap, synthesis.
    assert_eq!(result.llm_calls(), 3);
    let steps: Vec<ResearchStep> = result.reasoning_trace().iter().map(|r| r.step()).collect();
    assert!(!steps.contains(&ResearchStep::RefinedRetrieval));
}

#[tokio::test]
async fn test_sub_questions_truncated_to_cap() {
    let store = seeded_store().await;
    let llm = Arc::new(MockLlmProvider::new());
    let many: Vec<String> = (0..20).map(|i| format!("{{\"question\": \"q{}\"}}", i)).collect();
    llm.push_response(format!("{{\"sub_questions\": [{}]}}", many.join(",")));
    llm.push_response(r#"{"follow_up_queries": []}"#);
    llm.push_response("done");

    let options = ResearchOptions {
        max_sub_questions: 4,
        ..Default::default()
    };
    let pipeline = DeepResearchUseCase::new(store, llm);
    let result = pipeline.execute("q", options, None, None).await.unwrap();
    assert_eq!(result.sub_questions().len(), 4);
}

#[tokio::test]
async fn test_transient_provider_failure_is_retried() {
    let store = seeded_store().await;
    let llm = Arc::new(MockLlmProvider::new());
    llm.push_error(CoreError::rate_limited("slow down"));
    llm.push_response(DECOMPOSITION_JSON);
    llm.push_response(r#"{"follow_up_queries": []}"#);
    llm.push_response("answer");

    let pipeline = DeepResearchUseCase::new(store, llm.clone())
        .with_retry(RetryPolicy::new(2, Duration::ZERO));
    let result = pipeline
        .execute("q", ResearchOptions::default(), None, None)
        .await
        .unwrap();

    assert_eq!(result.answer(), "answer");
    // Four provider invocations, three logical calls.
    assert_eq!(llm.call_count(), 4);
    assert_eq!(result.llm_calls(), 3);
}

#[tokio::test]
async fn test_non_retryable_failure_propagates_immediately() {
    let store = seeded_store().await;
    let llm = Arc::new(MockLlmProvider::new());
    llm.push_error(CoreError::model_not_found("no such model"));

    let pipeline = DeepResearchUseCase::new(store, llm.clone())
        .with_retry(RetryPolicy::new(3, Duration::ZERO));
    let err = pipeline
        .execute("q", ResearchOptions::default(), None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::ModelNotFound(_)));
    assert_eq!(llm.call_count(), 1, "non-retryable errors are invoked once");
}

#[tokio::test]
async fn test_empty_store_still_answers() {
    let store = Arc::new(MemoryVectorStore::new(Arc::new(
        MockEmbeddingProvider::with_dimension(16),
    )));
    let llm = Arc::new(MockLlmProvider::new());
    llm.push_response(DECOMPOSITION_JSON);
    llm.push_response(r#"{"follow_up_queries": []}"#);
    llm.push_response("No relevant code was found.");

    let pipeline = DeepResearchUseCase::new(store, llm);
    let result = pipeline
        .execute("q", ResearchOptions::default(), None, None)
        .await
        .unwrap();

    assert_eq!(result.total_chunks_retrieved(), 0);
    assert_eq!(result.answer(), "No relevant code was found.");
}

#[tokio::test]
async fn test_empty_question_rejected() {
    let store = seeded_store().await;
    let llm = Arc::new(MockLlmProvider::new());
    let pipeline = DeepResearchUseCase::new(store, llm.clone());

    let err = pipeline
        .execute("   ", ResearchOptions::default(), None, None)
        .await
        .unwrap_err();
    assert!(err.is_invalid_argument());
    assert_eq!(llm.call_count(), 0);
}
