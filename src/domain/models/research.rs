use serde::{Deserialize, Serialize};

use super::Limits;

/// Named steps of the deep-research pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResearchStep {
    Decomposition,
    Retrieval,
    GapAnalysis,
    RefinedRetrieval,
    Synthesis,
    Cancelled,
}

impl ResearchStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchStep::Decomposition => "DECOMPOSITION",
            ResearchStep::Retrieval => "RETRIEVAL",
            ResearchStep::GapAnalysis => "GAP_ANALYSIS",
            ResearchStep::RefinedRetrieval => "REFINED_RETRIEVAL",
            ResearchStep::Synthesis => "SYNTHESIS",
            ResearchStep::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for ResearchStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse classification of a decomposed sub-question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionCategory {
    Implementation,
    Architecture,
    Usage,
    Integration,
    EdgeCases,
}

impl QuestionCategory {
    /// Unrecognised categories collapse to `Implementation`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "ARCHITECTURE" => QuestionCategory::Architecture,
            "USAGE" => QuestionCategory::Usage,
            "INTEGRATION" => QuestionCategory::Integration,
            "EDGE_CASES" | "EDGE CASES" => QuestionCategory::EdgeCases,
            _ => QuestionCategory::Implementation,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionCategory::Implementation => "IMPLEMENTATION",
            QuestionCategory::Architecture => "ARCHITECTURE",
            QuestionCategory::Usage => "USAGE",
            QuestionCategory::Integration => "INTEGRATION",
            QuestionCategory::EdgeCases => "EDGE_CASES",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubQuestion {
    question: String,
    category: QuestionCategory,
    rationale: Option<String>,
}

impl SubQuestion {
    pub fn new(question: impl Into<String>, category: QuestionCategory) -> Self {
        Self {
            question: question.into(),
            category,
            rationale: None,
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn category(&self) -> QuestionCategory {
        self.category
    }

    pub fn rationale(&self) -> Option<&str> {
        self.rationale.as_deref()
    }
}

/// Step-specific payload carried by a progress event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPayload {
    SubQuestions(Vec<SubQuestion>),
    FollowUps(Vec<String>),
    ChunkCounts { retrieved: usize, aggregate: usize },
    Text(String),
}

/// A progress event emitted once per entered pipeline step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchProgress {
    step: ResearchStep,
    step_number: u32,
    duration_ms: u64,
    payload: ProgressPayload,
}

impl ResearchProgress {
    pub fn new(
        step: ResearchStep,
        step_number: u32,
        duration_ms: u64,
        payload: ProgressPayload,
    ) -> Self {
        Self {
            step,
            step_number,
            duration_ms,
            payload,
        }
    }

    pub fn step(&self) -> ResearchStep {
        self.step
    }

    pub fn step_number(&self) -> u32 {
        self.step_number
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn payload(&self) -> &ProgressPayload {
        &self.payload
    }
}

/// One line of the reasoning trace: counts and timings, never payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    step: ResearchStep,
    step_number: u32,
    duration_ms: u64,
    summary: String,
}

impl StepRecord {
    pub fn new(
        step: ResearchStep,
        step_number: u32,
        duration_ms: u64,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            step,
            step_number,
            duration_ms,
            summary: summary.into(),
        }
    }

    pub fn step(&self) -> ResearchStep {
        self.step
    }

    pub fn step_number(&self) -> u32 {
        self.step_number
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchResult {
    answer: String,
    reasoning_trace: Vec<StepRecord>,
    sub_questions: Vec<SubQuestion>,
    total_chunks_retrieved: usize,
    llm_calls: u32,
}

impl ResearchResult {
    pub fn new(
        answer: String,
        reasoning_trace: Vec<StepRecord>,
        sub_questions: Vec<SubQuestion>,
        total_chunks_retrieved: usize,
        llm_calls: u32,
    ) -> Self {
        Self {
            answer,
            reasoning_trace,
            sub_questions,
            total_chunks_retrieved,
            llm_calls,
        }
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn reasoning_trace(&self) -> &[StepRecord] {
        &self.reasoning_trace
    }

    pub fn sub_questions(&self) -> &[SubQuestion] {
        &self.sub_questions
    }

    pub fn total_chunks_retrieved(&self) -> usize {
        self.total_chunks_retrieved
    }

    pub fn llm_calls(&self) -> u32 {
        self.llm_calls
    }
}

/// Knobs for a single research run. Values outside the configured bounds
/// are clamped before the pipeline starts.
#[derive(Debug, Clone)]
pub struct ResearchOptions {
    pub max_sub_questions: usize,
    pub max_chunks_per_sub_question: usize,
    pub max_follow_ups: usize,
    pub max_context_chunks: usize,
    pub llm_call_cap: u32,
    /// Per-chunk character budget applied when formatting synthesis context.
    pub chunk_char_budget: usize,
}

impl Default for ResearchOptions {
    fn default() -> Self {
        Self {
            max_sub_questions: 5,
            max_chunks_per_sub_question: 8,
            max_follow_ups: 3,
            max_context_chunks: 30,
            llm_call_cap: 15,
            chunk_char_budget: 2000,
        }
    }
}

impl ResearchOptions {
    pub const MAX_SUB_QUESTIONS: usize = 10;
    pub const MAX_FOLLOW_UPS: usize = 8;

    /// Clamp every knob into its documented range.
    pub fn clamped(&self, limits: &Limits) -> Self {
        Self {
            max_sub_questions: self.max_sub_questions.clamp(1, Self::MAX_SUB_QUESTIONS),
            max_chunks_per_sub_question: self
                .max_chunks_per_sub_question
                .clamp(limits.min_search_limit, 50),
            max_follow_ups: self.max_follow_ups.min(Self::MAX_FOLLOW_UPS),
            max_context_chunks: self
                .max_context_chunks
                .clamp(limits.min_context_chunks, limits.max_context_chunks),
            llm_call_cap: self.llm_call_cap.max(1),
            chunk_char_budget: self.chunk_char_budget.max(100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_category_maps_to_implementation() {
        assert_eq!(
            QuestionCategory::parse("PERFORMANCE"),
            QuestionCategory::Implementation
        );
        assert_eq!(
            QuestionCategory::parse("architecture"),
            QuestionCategory::Architecture
        );
        assert_eq!(
            QuestionCategory::parse("edge cases"),
            QuestionCategory::EdgeCases
        );
    }

    #[test]
    fn test_options_clamped() {
        let limits = Limits::default();
        let options = ResearchOptions {
            max_sub_questions: 99,
            max_chunks_per_sub_question: 0,
            max_follow_ups: 20,
            max_context_chunks: 500,
            llm_call_cap: 0,
            chunk_char_budget: 1,
        };

        let clamped = options.clamped(&limits);
        assert_eq!(clamped.max_sub_questions, 10);
        assert_eq!(clamped.max_chunks_per_sub_question, 1);
        assert_eq!(clamped.max_follow_ups, 8);
        assert_eq!(clamped.max_context_chunks, limits.max_context_chunks);
        assert_eq!(clamped.llm_call_cap, 1);
    }

    #[test]
    fn test_step_display() {
        assert_eq!(ResearchStep::GapAnalysis.to_string(), "GAP_ANALYSIS");
        assert_eq!(ResearchStep::Cancelled.to_string(), "CANCELLED");
    }
}
