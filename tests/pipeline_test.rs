//! End-to-end tests for the learning pipeline: ingestion through
//! classification and persistence, plus the single-flight drain guarantees.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

use sidelearn::{
    category, KeywordClassifier, LearnedRecord, LearnedStore, LearningEvent, LearningGate,
    LearningPipeline, SqliteLearnedStore,
};

/// One recorded insert_or_update call
#[derive(Debug, Clone)]
struct InsertCall {
    category: String,
    content: String,
    source: String,
    metadata: Option<String>,
    increment_score: bool,
    user_prompt: Option<String>,
}

/// Store fake that records calls and tracks write concurrency
#[derive(Default)]
struct RecordingStore {
    inserts: Mutex<Vec<InsertCall>>,
    decrements: Mutex<Vec<i64>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl RecordingStore {
    fn inserts(&self) -> Vec<InsertCall> {
        self.inserts.lock().unwrap().clone()
    }

    fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LearnedStore for RecordingStore {
    async fn insert_or_update<'a>(
        &self,
        category: &str,
        content: &str,
        source: &str,
        metadata: Option<&'a str>,
        increment_score: bool,
        user_prompt: Option<&'a str>,
    ) -> Result<()> {
        let n = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(n, Ordering::SeqCst);
        // Hold the write open long enough for any overlap to register
        tokio::time::sleep(Duration::from_micros(200)).await;

        self.inserts.lock().unwrap().push(InsertCall {
            category: category.to_string(),
            content: content.to_string(),
            source: source.to_string(),
            metadata: metadata.map(str::to_string),
            increment_score,
            user_prompt: user_prompt.map(str::to_string),
        });
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn decrement_score(&self, entry_id: i64) -> Result<()> {
        self.decrements.lock().unwrap().push(entry_id);
        Ok(())
    }

    async fn get_by_category(&self, _category: &str, _limit: usize) -> Result<Vec<LearnedRecord>> {
        Ok(Vec::new())
    }
}

/// Store fake whose inserts fail when the content contains a marker
struct FailingStore {
    inner: RecordingStore,
}

#[async_trait]
impl LearnedStore for FailingStore {
    async fn insert_or_update<'a>(
        &self,
        category: &str,
        content: &str,
        source: &str,
        metadata: Option<&'a str>,
        increment_score: bool,
        user_prompt: Option<&'a str>,
    ) -> Result<()> {
        if content.contains("poison") {
            anyhow::bail!("simulated store failure");
        }
        self.inner
            .insert_or_update(category, content, source, metadata, increment_score, user_prompt)
            .await
    }

    async fn decrement_score(&self, entry_id: i64) -> Result<()> {
        self.inner.decrement_score(entry_id).await
    }

    async fn get_by_category(&self, category: &str, limit: usize) -> Result<Vec<LearnedRecord>> {
        self.inner.get_by_category(category, limit).await
    }
}

fn pipeline_over(store: Arc<dyn LearnedStore>) -> Arc<LearningPipeline> {
    LearningPipeline::new(
        store,
        Arc::new(KeywordClassifier::new()),
        Arc::new(LearningGate::new(true, "claude")),
        "sidelearn",
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_enqueued_task_is_processed() {
    let store = Arc::new(RecordingStore::default());
    let pipeline = pipeline_over(store.clone());

    let producers = 8;
    let per_producer = 25;
    let mut handles = Vec::new();
    for p in 0..producers {
        let pipeline = pipeline.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..per_producer {
                pipeline.learn_from_tool_result(
                    format!("tool_{}", p),
                    format!("result {} from producer {}", i, p),
                    true,
                    "normal_flow",
                );
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    pipeline.wait_idle().await;

    assert_eq!(store.inserts().len(), producers * per_producer);
    // Sequential drain bounds store write concurrency to one
    assert_eq!(store.peak_in_flight(), 1);
    assert_eq!(pipeline.drains_peak(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_flight_across_repeated_bursts() {
    let store = Arc::new(RecordingStore::default());
    let pipeline = pipeline_over(store.clone());

    // Short bursts with gaps let the drain loop wind down and restart,
    // exercising the clear-then-recheck window
    let mut handles = Vec::new();
    for p in 0..4 {
        let pipeline = pipeline.clone();
        handles.push(tokio::spawn(async move {
            for burst in 0..20 {
                for i in 0..5 {
                    pipeline.learn_from_tool_result(
                        "execute_command",
                        format!("burst {} item {} producer {}", burst, i, p),
                        true,
                        "normal_flow",
                    );
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    pipeline.wait_idle().await;

    assert_eq!(store.inserts().len(), 4 * 20 * 5);
    assert_eq!(pipeline.drains_peak(), 1);
}

#[tokio::test]
async fn test_fix_end_to_end() {
    let store = Arc::new(RecordingStore::default());
    let pipeline = pipeline_over(store.clone());
    let mut events = pipeline.subscribe();

    pipeline.learn_from_fix(
        "x=1",
        "x=2",
        Some("off by one".to_string()),
        "debug_feedback",
        None,
        None,
    );
    pipeline.wait_idle().await;

    let inserts = store.inserts();
    assert_eq!(inserts.len(), 1);
    let insert = &inserts[0];
    assert_eq!(insert.category, category::FIX_PATCH);
    assert_eq!(insert.content, "OLD:\nx=1\n\nNEW:\nx=2\n\nREASON: off by one");
    assert_eq!(insert.source, "debug_feedback");
    assert!(insert.increment_score);

    let metadata: serde_json::Value =
        serde_json::from_str(insert.metadata.as_deref().unwrap()).unwrap();
    assert_eq!(metadata["old_code"], "x=1");
    assert_eq!(metadata["new_code"], "x=2");
    assert_eq!(metadata["reason"], "off by one");

    let event = timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed");
    match event {
        LearningEvent::Learned {
            category: cat,
            content_preview,
            ..
        } => {
            assert_eq!(cat, category::FIX_PATCH);
            let expected: String = insert.content.chars().take(100).collect();
            assert_eq!(content_preview, expected);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_question_answer_end_to_end() {
    let store = Arc::new(RecordingStore::default());
    let pipeline = pipeline_over(store.clone());
    let mut events = pipeline.subscribe();

    pipeline.learn_from_question_answer(
        "What port?",
        "8080",
        Some(vec!["server.go".to_string()]),
        "normal_flow",
    );
    pipeline.wait_idle().await;

    let inserts = store.inserts();
    assert_eq!(inserts.len(), 1);
    let insert = &inserts[0];
    assert_eq!(insert.category, category::METADATA_TRANSFORMATION);
    assert_eq!(insert.content, "Q: What port?\n\nA: 8080");
    assert_eq!(insert.user_prompt.as_deref(), Some("What port?"));

    let metadata: serde_json::Value =
        serde_json::from_str(insert.metadata.as_deref().unwrap()).unwrap();
    assert_eq!(metadata["question"], "What port?");
    assert_eq!(metadata["answer"], "8080");
    assert_eq!(metadata["files_read"][0], "server.go");

    let event = timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed");
    match event {
        LearningEvent::Learned {
            category: cat,
            confidence,
            ..
        } => {
            assert_eq!(cat, category::QUESTION_ANSWER);
            assert!((confidence - 1.0).abs() < f64::EPSILON);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_streaming_below_floor_is_a_noop() {
    let store = Arc::new(RecordingStore::default());
    let pipeline = pipeline_over(store.clone());

    let accumulated = "x".repeat(49);
    pipeline.learn_from_streaming_chunk("a", accumulated, "normal_flow");
    pipeline.wait_idle().await;

    assert!(store.inserts().is_empty());
}

#[tokio::test]
async fn test_streaming_line_break_fires_without_event() {
    let store = Arc::new(RecordingStore::default());
    let pipeline = pipeline_over(store.clone());
    let mut events = pipeline.subscribe();

    let accumulated = format!("{}\n", "x".repeat(59));
    pipeline.learn_from_streaming_chunk("x\n", accumulated.clone(), "normal_flow");
    pipeline.wait_idle().await;

    let inserts = store.inserts();
    assert_eq!(inserts.len(), 1);
    assert_eq!(inserts[0].content, accumulated);
    assert!(inserts[0].metadata.is_none());
    // Streaming persists silently
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_gating_is_evaluated_at_enqueue_time_only() {
    let store = Arc::new(RecordingStore::default());
    let gate = Arc::new(LearningGate::new(true, "claude"));
    let pipeline = LearningPipeline::new(
        store.clone(),
        Arc::new(KeywordClassifier::new()),
        gate.clone(),
        "sidelearn",
    );

    pipeline.learn_from_question_answer("q", "a", None, "normal_flow");
    gate.set_enabled(false);
    pipeline.wait_idle().await;

    // The queued task is processed despite learning being disabled now
    assert_eq!(store.inserts().len(), 1);

    pipeline.learn_from_question_answer("q2", "a2", None, "normal_flow");
    pipeline.wait_idle().await;
    assert_eq!(store.inserts().len(), 1);
}

#[tokio::test]
async fn test_failing_task_does_not_poison_the_loop() {
    let store = Arc::new(FailingStore {
        inner: RecordingStore::default(),
    });
    let pipeline = pipeline_over(store.clone());
    let mut events = pipeline.subscribe();

    pipeline.learn_from_tool_result("read_file", "poison payload", true, "normal_flow");
    pipeline.learn_from_tool_result("read_file", "healthy payload", true, "normal_flow");
    pipeline.wait_idle().await;

    // The healthy task still went through
    let inserts = store.inner.inserts();
    assert_eq!(inserts.len(), 1);
    assert_eq!(inserts[0].content, "healthy payload");

    let event = timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed");
    assert!(matches!(event, LearningEvent::Error { .. }));
}

#[tokio::test]
async fn test_store_swap_redirects_writes() {
    let first = Arc::new(RecordingStore::default());
    let second = Arc::new(RecordingStore::default());
    let pipeline = pipeline_over(first.clone());

    pipeline.learn_from_question_answer("q1", "a1", None, "normal_flow");
    pipeline.wait_idle().await;

    pipeline.set_store(second.clone()).await;

    pipeline.learn_from_question_answer("q2", "a2", None, "normal_flow");
    pipeline.wait_idle().await;

    assert_eq!(first.inserts().len(), 1);
    assert_eq!(second.inserts().len(), 1);
    assert_eq!(second.inserts()[0].content, "Q: q2\n\nA: a2");
}

#[tokio::test]
async fn test_stats_sample_one_record_per_category() {
    let store = Arc::new(SqliteLearnedStore::in_memory().unwrap());
    let pipeline = pipeline_over(store);

    pipeline.learn_from_question_answer("What port?", "8080", None, "normal_flow");
    pipeline.learn_from_fix("x=1", "x=2", Some("off by one".to_string()), "normal_flow", None, None);
    pipeline.learn_from_question_answer("Which db?", "sqlite", None, "normal_flow");
    pipeline.wait_idle().await;

    let stats = pipeline.get_stats().await.unwrap();

    // Two QA records exist, but sampling caps the count at one
    assert_eq!(stats.categories.get(category::METADATA_TRANSFORMATION), Some(&1));
    assert_eq!(stats.categories.get(category::FIX_PATCH), Some(&1));
    assert!(stats.total_score >= 2.0);
}
