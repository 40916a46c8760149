//! Sidelearn - Session Learning Pipeline Library
//!
//! Turns byproducts of an interactive coding-assistant session into scored,
//! categorized knowledge without blocking the producing session:
//! - Fire-and-forget ingestion of generated code, fixes, streaming output,
//!   tool results, and question/answer pairs
//! - A single-flight drain loop that classifies and persists sequentially
//! - A broadcast stream of learning events for interested observers
//! - Negative feedback that decrements a record's score
//!
//! # Example
//!
//! ```ignore
//! use sidelearn::{KeywordClassifier, LearningGate, LearningPipeline, SqliteLearnedStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteLearnedStore::new("learned.db").await?);
//!     let gate = Arc::new(LearningGate::new(true, "claude"));
//!     let pipeline = LearningPipeline::new(
//!         store,
//!         Arc::new(KeywordClassifier::new()),
//!         gate,
//!         "sidelearn",
//!     );
//!
//!     pipeline.learn_from_fix("x=1", "x=2", Some("off by one".into()), "normal_flow", None, None);
//!     pipeline.wait_idle().await;
//!     Ok(())
//! }
//! ```

// Core modules (order matters for cross-module dependencies)
pub mod types;
pub mod gating;
pub mod classify;
pub mod store;
pub mod pipeline;
pub mod config;
pub mod cli;

// Re-export commonly used types for convenience
pub use classify::{Classification, Classifier, KeywordClassifier};
pub use config::Config;
pub use gating::LearningGate;
pub use pipeline::LearningPipeline;
pub use store::{LearnedRecord, LearnedStore, SqliteLearnedStore};
pub use types::{category, LearnTask, LearningEvent, LearningStats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Session Learning Pipeline Library", NAME, VERSION)
}
