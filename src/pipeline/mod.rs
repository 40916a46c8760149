//! Asynchronous learning pipeline
//!
//! Producers hand session byproducts to the ingestion API, which gates,
//! queues, and triggers a single-flight drain loop on the tokio runtime.
//! The drain loop classifies and persists each task sequentially and
//! broadcasts learning events to subscribers.

mod processor;
mod queue;

use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::classify::Classifier;
use crate::gating::LearningGate;
use crate::store::LearnedStore;
use crate::types::{category, LearnTask, LearningEvent, LearningStats};

use processor::{SharedStore, TaskProcessor};
use queue::TaskQueue;

/// Broadcast capacity for learning events; slow subscribers lose events
/// rather than applying back-pressure.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// The learning pipeline service.
///
/// One instance owns its queue, running indicator, gate, and store
/// reference; nothing here is process-global. Cheap to share behind an
/// [`Arc`]; all ingestion entry points are non-blocking and safe to call
/// from any number of producer contexts.
pub struct LearningPipeline {
    queue: TaskQueue,
    /// Single-flight indicator for the drain loop
    running: AtomicBool,
    /// Instrumentation around the drain body
    drains_active: AtomicUsize,
    drains_peak: AtomicUsize,
    gate: Arc<LearningGate>,
    /// Identity used against the gate's active provider
    provider: String,
    store: SharedStore,
    processor: TaskProcessor,
    events: broadcast::Sender<LearningEvent>,
}

impl LearningPipeline {
    /// Create a pipeline over the given store, classifier, and gate.
    ///
    /// `provider` is this pipeline's own identity; learning is suppressed
    /// while the gate reports it as the active provider.
    pub fn new(
        store: Arc<dyn LearnedStore>,
        classifier: Arc<dyn Classifier>,
        gate: Arc<LearningGate>,
        provider: impl Into<String>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let store: SharedStore = Arc::new(RwLock::new(store));
        let processor = TaskProcessor::new(classifier, Arc::clone(&store), events.clone());

        Arc::new(Self {
            queue: TaskQueue::new(),
            running: AtomicBool::new(false),
            drains_active: AtomicUsize::new(0),
            drains_peak: AtomicUsize::new(0),
            gate,
            provider: provider.into(),
            store,
            processor,
            events,
        })
    }

    // --- Ingestion API ---

    /// Learn from generated code
    pub fn learn_from_code_generation(
        self: &Arc<Self>,
        code: impl Into<String>,
        context: Option<String>,
        source: impl Into<String>,
        metadata: Option<HashMap<String, serde_json::Value>>,
        user_prompt: Option<String>,
    ) {
        self.enqueue(LearnTask::CodeGeneration {
            code: code.into(),
            context,
            source: source.into(),
            metadata,
            user_prompt,
        });
    }

    /// Learn from a streamed output chunk
    pub fn learn_from_streaming_chunk(
        self: &Arc<Self>,
        chunk: impl Into<String>,
        accumulated_content: impl Into<String>,
        source: impl Into<String>,
    ) {
        self.enqueue(LearnTask::StreamingChunk {
            chunk: chunk.into(),
            accumulated_content: accumulated_content.into(),
            source: source.into(),
        });
    }

    /// Learn from an applied fix
    pub fn learn_from_fix(
        self: &Arc<Self>,
        old_code: impl Into<String>,
        new_code: impl Into<String>,
        reason: Option<String>,
        source: impl Into<String>,
        user_prompt: Option<String>,
        keywords: Option<Vec<String>>,
    ) {
        self.enqueue(LearnTask::Fix {
            old_code: old_code.into(),
            new_code: new_code.into(),
            reason,
            source: source.into(),
            user_prompt,
            keywords,
        });
    }

    /// Learn from a tool invocation; failed invocations are ignored
    pub fn learn_from_tool_result(
        self: &Arc<Self>,
        tool_name: impl Into<String>,
        result: impl Into<String>,
        success: bool,
        source: impl Into<String>,
    ) {
        if !success {
            return;
        }
        self.enqueue(LearnTask::ToolResult {
            tool_name: tool_name.into(),
            result: result.into(),
            source: source.into(),
        });
    }

    /// Learn from a direct question/answer exchange
    pub fn learn_from_question_answer(
        self: &Arc<Self>,
        question: impl Into<String>,
        answer: impl Into<String>,
        files_read: Option<Vec<String>>,
        source: impl Into<String>,
    ) {
        self.enqueue(LearnTask::QuestionAnswer {
            question: question.into(),
            answer: answer.into(),
            files_read,
            source: source.into(),
        });
    }

    /// Gate, queue, and trigger the dispatcher. Gating is evaluated here,
    /// at enqueue time only: a task already queued is always processed.
    fn enqueue(self: &Arc<Self>, task: LearnTask) {
        if !self.gate.allows(&self.provider) {
            debug!("Learning gated off, dropping {} input", task.kind());
            return;
        }
        self.queue.push(task);
        self.trigger();
    }

    // --- Dispatcher ---

    /// Spawn the drain loop if no drain is currently running. Concurrent
    /// triggers are no-ops; only the caller winning the idle->running
    /// transition spawns.
    fn trigger(self: &Arc<Self>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let pipeline = Arc::clone(self);
            tokio::spawn(async move {
                pipeline.drain().await;
            });
        }
    }

    /// Drain the queue sequentially until it is observed empty.
    ///
    /// After clearing the running indicator the queue is re-checked once:
    /// a task enqueued during the clear window must not be stranded until
    /// the next unrelated trigger.
    async fn drain(&self) {
        loop {
            let active = self.drains_active.fetch_add(1, Ordering::SeqCst) + 1;
            self.drains_peak.fetch_max(active, Ordering::SeqCst);

            while let Some(task) = self.queue.pop() {
                let kind = task.kind();
                if let Err(e) = self.processor.handle(task).await {
                    warn!("Learning task ({}) failed and was dropped: {:#}", kind, e);
                    let _ = self.events.send(LearningEvent::Error {
                        message: format!("{:#}", e),
                    });
                }
            }

            self.drains_active.fetch_sub(1, Ordering::SeqCst);
            self.running.store(false, Ordering::Release);

            if self.queue.is_empty() {
                break;
            }
            // A producer slipped in during the clear window; resume unless
            // another trigger already claimed the loop.
            if self
                .running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                break;
            }
        }
    }

    // --- Feedback, stats, events ---

    /// Decrement a stored record's score on a background task. Gated by the
    /// same predicate as ingestion; at most one decrement per call.
    pub fn record_negative_feedback(self: &Arc<Self>, entry_id: i64) {
        if !self.gate.allows(&self.provider) {
            return;
        }
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let store = pipeline.store.read().await.clone();
            match store.decrement_score(entry_id).await {
                Ok(()) => {
                    let _ = pipeline
                        .events
                        .send(LearningEvent::NegativeFeedback { entry_id });
                }
                Err(e) => {
                    warn!("Negative feedback for entry {} failed: {:#}", entry_id, e);
                    let _ = pipeline.events.send(LearningEvent::Error {
                        message: format!("negative feedback failed: {:#}", e),
                    });
                }
            }
        });
    }

    /// Sample learned-data counts and scores per known category.
    ///
    /// Queries one record per category: counts are capped at 1 and the
    /// score total reflects only each category's top record.
    pub async fn get_stats(&self) -> Result<LearningStats> {
        let store = self.store.read().await.clone();
        let mut stats = LearningStats::default();

        for cat in category::ALL {
            let records = store.get_by_category(cat, 1).await?;
            if !records.is_empty() {
                stats.categories.insert((*cat).to_string(), records.len());
                stats.total_score += records[0].score;
            }
        }

        Ok(stats)
    }

    /// Subscribe to learning events. Events are fire-and-forget: nothing
    /// emitted before this call is replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<LearningEvent> {
        self.events.subscribe()
    }

    /// Swap the shared store reference, e.g. when the active model changes
    /// and learned data moves to a per-model dataset.
    pub async fn set_store(&self, store: Arc<dyn LearnedStore>) {
        *self.store.write().await = store;
    }

    /// The gate controlling ingestion
    pub fn gate(&self) -> &LearningGate {
        self.gate.as_ref()
    }

    /// Number of tasks currently queued
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Highest number of concurrently active drain loops observed
    pub fn drains_peak(&self) -> usize {
        self.drains_peak.load(Ordering::SeqCst)
    }

    /// Wait until the queue is empty and no drain loop is running.
    /// Intended for orderly shutdown and tests.
    pub async fn wait_idle(&self) {
        loop {
            if self.queue.is_empty() && !self.running.load(Ordering::Acquire) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
