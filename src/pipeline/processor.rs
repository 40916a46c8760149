//! Per-kind task processing
//!
//! Each handler classifies its input, builds persistence metadata, writes
//! through the shared store reference, and emits a learning event where the
//! task kind calls for one. Handlers are independent: one failing task never
//! aborts the drain loop.

use anyhow::Result;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::classify::Classifier;
use crate::store::LearnedStore;
use crate::types::{category, LearnTask, LearningEvent};

/// Minimum accumulated length before a streaming chunk is considered
const STREAM_MIN_CONTENT_LEN: usize = 50;
/// Length-based sampling interval for long streams
const STREAM_SAMPLE_INTERVAL: usize = 200;
/// Maximum characters in a Learned event content preview
const PREVIEW_MAX_CHARS: usize = 100;

/// Store reference shared with the pipeline; may be swapped to point at a
/// different underlying dataset (e.g. keyed by model name).
pub(crate) type SharedStore = Arc<RwLock<Arc<dyn LearnedStore>>>;

/// Dispatches queued tasks by kind
pub(crate) struct TaskProcessor {
    classifier: Arc<dyn Classifier>,
    store: SharedStore,
    events: broadcast::Sender<LearningEvent>,
}

/// Structured metadata persisted with a fix-patch record
#[derive(Serialize)]
struct FixMetadata<'a> {
    old_code: &'a str,
    new_code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keywords: Option<&'a [String]>,
}

/// Structured metadata persisted with a question/answer record
#[derive(Serialize)]
struct QaMetadata<'a> {
    question: &'a str,
    answer: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    files_read: Option<&'a [String]>,
}

impl TaskProcessor {
    pub(crate) fn new(
        classifier: Arc<dyn Classifier>,
        store: SharedStore,
        events: broadcast::Sender<LearningEvent>,
    ) -> Self {
        Self {
            classifier,
            store,
            events,
        }
    }

    /// Process one task. Errors propagate to the drain loop, which turns
    /// them into an Error event and drops the task.
    pub(crate) async fn handle(&self, task: LearnTask) -> Result<()> {
        debug!("Processing {} task", task.kind());
        match task {
            LearnTask::CodeGeneration {
                code,
                context,
                source,
                metadata,
                user_prompt,
            } => {
                self.handle_code_generation(code, context, source, metadata, user_prompt)
                    .await
            }
            LearnTask::StreamingChunk {
                chunk,
                accumulated_content,
                source,
            } => {
                self.handle_streaming_chunk(chunk, accumulated_content, source)
                    .await
            }
            LearnTask::Fix {
                old_code,
                new_code,
                reason,
                source,
                user_prompt,
                keywords,
            } => {
                self.handle_fix(old_code, new_code, reason, source, user_prompt, keywords)
                    .await
            }
            LearnTask::ToolResult {
                tool_name,
                result,
                source,
            } => self.handle_tool_result(tool_name, result, source).await,
            LearnTask::QuestionAnswer {
                question,
                answer,
                files_read,
                source,
            } => {
                self.handle_question_answer(question, answer, files_read, source)
                    .await
            }
        }
    }

    async fn handle_code_generation(
        &self,
        code: String,
        context: Option<String>,
        source: String,
        metadata: Option<HashMap<String, serde_json::Value>>,
        user_prompt: Option<String>,
    ) -> Result<()> {
        let classification = self.classifier.classify(&code, context.as_deref()).await?;

        let metadata_json = build_code_metadata(
            &classification.category,
            metadata,
            user_prompt.as_deref(),
            &code,
        )?;

        self.store()
            .await
            .insert_or_update(
                &classification.category,
                &code,
                &source,
                metadata_json.as_deref(),
                true,
                user_prompt.as_deref(),
            )
            .await?;

        self.emit(LearningEvent::Learned {
            category: classification.category,
            content_preview: preview(&code),
            confidence: classification.confidence,
        });
        Ok(())
    }

    async fn handle_streaming_chunk(
        &self,
        chunk: String,
        accumulated_content: String,
        source: String,
    ) -> Result<()> {
        if !stream_should_fire(&chunk, &accumulated_content) {
            return Ok(());
        }

        let classification = self.classifier.classify(&accumulated_content, None).await?;

        // Streaming updates are too frequent to surface as events
        self.store()
            .await
            .insert_or_update(
                &classification.category,
                &accumulated_content,
                &source,
                None,
                true,
                None,
            )
            .await?;
        Ok(())
    }

    async fn handle_fix(
        &self,
        old_code: String,
        new_code: String,
        reason: Option<String>,
        source: String,
        user_prompt: Option<String>,
        keywords: Option<Vec<String>>,
    ) -> Result<()> {
        let metadata = serde_json::to_string(&FixMetadata {
            old_code: &old_code,
            new_code: &new_code,
            reason: reason.as_deref(),
            keywords: keywords.as_deref(),
        })?;

        let content = fix_content(&old_code, &new_code, reason.as_deref());
        let classification = self.classifier.classify(&content, reason.as_deref()).await?;

        self.store()
            .await
            .insert_or_update(
                category::FIX_PATCH,
                &content,
                &source,
                Some(&metadata),
                true,
                user_prompt.as_deref(),
            )
            .await?;

        self.emit(LearningEvent::Learned {
            category: category::FIX_PATCH.to_string(),
            content_preview: preview(&content),
            confidence: classification.confidence,
        });
        Ok(())
    }

    async fn handle_tool_result(
        &self,
        tool_name: String,
        result: String,
        source: String,
    ) -> Result<()> {
        let classification = self.classifier.classify(&result, Some(&tool_name)).await?;
        let metadata = serde_json::json!({ "tool_name": tool_name }).to_string();

        self.store()
            .await
            .insert_or_update(
                &classification.category,
                &result,
                &source,
                Some(&metadata),
                true,
                None,
            )
            .await?;
        Ok(())
    }

    async fn handle_question_answer(
        &self,
        question: String,
        answer: String,
        files_read: Option<Vec<String>>,
        source: String,
    ) -> Result<()> {
        let content = format!("Q: {}\n\nA: {}", question, answer);
        let metadata = serde_json::to_string(&QaMetadata {
            question: &question,
            answer: &answer,
            files_read: files_read.as_deref(),
        })?;

        self.store()
            .await
            .insert_or_update(
                category::METADATA_TRANSFORMATION,
                &content,
                &source,
                Some(&metadata),
                true,
                Some(&question),
            )
            .await?;

        // Confidence is fixed: a direct Q/A pair needs no classifier
        self.emit(LearningEvent::Learned {
            category: category::QUESTION_ANSWER.to_string(),
            content_preview: preview(&content),
            confidence: 1.0,
        });
        Ok(())
    }

    async fn store(&self) -> Arc<dyn LearnedStore> {
        self.store.read().await.clone()
    }

    fn emit(&self, event: LearningEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }
}

/// Sampling policy for streaming chunks: ignore short accumulations, then
/// only fire at length intervals or when the chunk ends a line.
pub(crate) fn stream_should_fire(chunk: &str, accumulated: &str) -> bool {
    if accumulated.len() < STREAM_MIN_CONTENT_LEN {
        return false;
    }
    accumulated.len() % STREAM_SAMPLE_INTERVAL == 0 || chunk.ends_with('\n')
}

/// Build the human-readable content block for a fix record
pub(crate) fn fix_content(old_code: &str, new_code: &str, reason: Option<&str>) -> String {
    let mut content = format!("OLD:\n{}\n\nNEW:\n{}\n", old_code, new_code);
    if let Some(reason) = reason {
        content.push_str(&format!("\nREASON: {}", reason));
    }
    content
}

/// Flatten code-generation metadata to a JSON string, merging the user
/// prompt and its relevance score when the record is a metadata
/// transformation.
fn build_code_metadata(
    classified_category: &str,
    metadata: Option<HashMap<String, serde_json::Value>>,
    user_prompt: Option<&str>,
    code: &str,
) -> Result<Option<String>> {
    if classified_category == category::METADATA_TRANSFORMATION {
        if let Some(prompt) = user_prompt {
            let mut map = metadata.unwrap_or_default();
            map.insert(
                "user_prompt".to_string(),
                serde_json::Value::String(prompt.to_string()),
            );
            map.insert(
                "prompt_relevance".to_string(),
                serde_json::json!(prompt_relevance(prompt, code)),
            );
            return Ok(Some(serde_json::to_string(&map)?));
        }
    }

    metadata
        .map(|m| serde_json::to_string(&m))
        .transpose()
        .map_err(Into::into)
}

/// Share of qualifying prompt tokens that also appear in the code.
///
/// Tokens are lowercase alphanumeric runs longer than two characters. A
/// prompt with no qualifying tokens scores 0.5.
pub(crate) fn prompt_relevance(prompt: &str, code: &str) -> f64 {
    let prompt_tokens = significant_tokens(prompt);
    if prompt_tokens.is_empty() {
        return 0.5;
    }
    let code_tokens = significant_tokens(code);
    let shared = prompt_tokens.intersection(&code_tokens).count();

    (shared as f64 / prompt_tokens.len() as f64).clamp(0.0, 1.0)
}

fn significant_tokens(s: &str) -> HashSet<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_string)
        .collect()
}

/// First 100 characters of the content, for event previews
pub(crate) fn preview(s: &str) -> String {
    s.chars().take(PREVIEW_MAX_CHARS).collect()
}
