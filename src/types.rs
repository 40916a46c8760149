//! Shared types used across modules
//!
//! Defines the learning task and event variants that flow through the
//! pipeline, plus the aggregated stats snapshot returned to callers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Knowledge categories used by the classifier and the learned-data store.
pub mod category {
    /// Reusable code shapes and implementation approaches
    pub const CODE_PATTERN: &str = "code_pattern";
    /// Old/new code pairs captured from applied fixes
    pub const FIX_PATCH: &str = "fix_patch";
    /// Auxiliary structured context (Q&A pairs, prompt relevance)
    pub const METADATA_TRANSFORMATION: &str = "metadata_transformation";
    /// Tool invocations and their results
    pub const TOOL_USAGE: &str = "tool_usage";
    /// Errors, panics, and failure traces
    pub const ERROR_PATTERN: &str = "error_pattern";
    /// Configuration fragments and settings
    pub const CONFIGURATION: &str = "configuration";
    /// Direct question/answer pairs
    pub const QUESTION_ANSWER: &str = "question_answer";
    /// Anything the classifier cannot place more precisely
    pub const GENERAL: &str = "general";

    /// All categories known to the stats aggregator
    pub const ALL: &[&str] = &[
        CODE_PATTERN,
        FIX_PATCH,
        METADATA_TRANSFORMATION,
        TOOL_USAGE,
        ERROR_PATTERN,
        CONFIGURATION,
        QUESTION_ANSWER,
        GENERAL,
    ];
}

/// A unit of learning input queued for asynchronous classification
/// and persistence. Immutable once enqueued; consumed exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LearnTask {
    /// Code produced by the assistant
    CodeGeneration {
        code: String,
        context: Option<String>,
        source: String,
        metadata: Option<HashMap<String, serde_json::Value>>,
        user_prompt: Option<String>,
    },
    /// A chunk of streamed output plus everything accumulated so far
    StreamingChunk {
        chunk: String,
        accumulated_content: String,
        source: String,
    },
    /// An applied fix: old code, new code, and why it changed
    Fix {
        old_code: String,
        new_code: String,
        reason: Option<String>,
        source: String,
        user_prompt: Option<String>,
        keywords: Option<Vec<String>>,
    },
    /// A successful tool invocation result
    ToolResult {
        tool_name: String,
        result: String,
        source: String,
    },
    /// A direct question/answer exchange
    QuestionAnswer {
        question: String,
        answer: String,
        files_read: Option<Vec<String>>,
        source: String,
    },
}

impl LearnTask {
    /// Short kind label for logging
    pub fn kind(&self) -> &'static str {
        match self {
            LearnTask::CodeGeneration { .. } => "code_generation",
            LearnTask::StreamingChunk { .. } => "streaming_chunk",
            LearnTask::Fix { .. } => "fix",
            LearnTask::ToolResult { .. } => "tool_result",
            LearnTask::QuestionAnswer { .. } => "question_answer",
        }
    }
}

/// Event broadcast after a task is processed. Ephemeral: delivered only
/// to subscribers listening at emission time, never replayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LearningEvent {
    /// Something was classified and persisted
    Learned {
        category: String,
        content_preview: String,
        confidence: f64,
    },
    /// A stored record's score was decremented
    NegativeFeedback { entry_id: i64 },
    /// A task failed during processing and was dropped
    Error { message: String },
}

/// Snapshot of learned-data counts and scores.
///
/// Sampled with a per-category query limit of 1: each count is capped at
/// one and the score total sums only the top record per category.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningStats {
    /// Per-category record counts (bounded by the sampling limit)
    pub categories: HashMap<String, usize>,
    /// Running total of the sampled records' scores
    pub total_score: f64,
}
