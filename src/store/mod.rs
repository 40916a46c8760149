//! Learned-data storage
//!
//! Provides the persistence contract consumed by the pipeline and the
//! default SQLite-backed implementation. Records are keyed by category and
//! carry a score adjusted only through increment-on-learn and
//! decrement-on-negative-feedback.

pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use sqlite::SqliteLearnedStore;

/// A scored learned-data record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedRecord {
    /// Row id, used for negative feedback
    pub id: i64,
    /// Knowledge category
    pub category: String,
    /// The learned content
    pub content: String,
    /// Provenance tag (e.g. "normal_flow", "debug_feedback")
    pub source: String,
    /// Structured metadata as a single-line JSON string
    pub metadata: Option<String>,
    /// The user prompt that led to this content, when known
    pub user_prompt: Option<String>,
    /// Relevance score; incremented on re-learn, decremented on feedback
    pub score: f64,
    /// How many times this record has been upserted
    pub use_count: u32,
    /// When this record was first created
    pub created_at: DateTime<Utc>,
    /// When this record was last touched
    pub updated_at: DateTime<Utc>,
}

/// Storage contract for learned data
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LearnedStore: Send + Sync {
    /// Insert a record, or update the existing one for the same
    /// (category, content) pair. `increment_score` bumps the score on
    /// update; failures must propagate, never be swallowed.
    async fn insert_or_update<'a>(
        &self,
        category: &str,
        content: &str,
        source: &str,
        metadata: Option<&'a str>,
        increment_score: bool,
        user_prompt: Option<&'a str>,
    ) -> Result<()>;

    /// Decrement a record's score by id
    async fn decrement_score(&self, entry_id: i64) -> Result<()>;

    /// Fetch up to `limit` records for a category, best-scored first
    async fn get_by_category(&self, category: &str, limit: usize) -> Result<Vec<LearnedRecord>>;
}
