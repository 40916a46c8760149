//! Text classification for learned data
//!
//! The pipeline treats classification as an injected capability: hosts can
//! plug in an LLM-backed implementation, while the built-in keyword
//! classifier keeps the binary self-contained.

use anyhow::Result;
use async_trait::async_trait;

use crate::types::category;

/// Result of classifying a piece of text
#[derive(Debug, Clone)]
pub struct Classification {
    /// One of the categories in [`crate::types::category`]
    pub category: String,
    /// Confidence in the assignment, 0.0 to 1.0
    pub confidence: f64,
}

/// Maps text plus optional context to a category and confidence
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str, context: Option<&str>) -> Result<Classification>;
}

/// Patterns that indicate an error or failure trace
const ERROR_PATTERNS: &[&str] = &[
    "error",
    "panic",
    "exception",
    "traceback",
    "failed",
    "stack trace",
    "segfault",
];

/// Patterns that indicate configuration content
const CONFIG_PATTERNS: &[&str] = &[
    "config",
    "configuration",
    ".toml",
    ".yaml",
    ".yml",
    ".json",
    "env var",
    "environment variable",
];

/// Patterns that indicate source code
const CODE_PATTERNS: &[&str] = &[
    "fn ", "def ", "class ", "impl ", "struct ", "func ", "function ", "return ", "import ",
    "use ", "pub ", "let ", "const ", "=>", "->",
];

/// Patterns that indicate descriptive/structural context rather than code
const METADATA_PATTERNS: &[&str] = &["q:", "question:", "answer:", "summary:", "explanation"];

/// Built-in keyword-based classifier
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    fn matches_any(haystack: &str, patterns: &[&str]) -> bool {
        patterns.iter().any(|p| haystack.contains(p))
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, text: &str, context: Option<&str>) -> Result<Classification> {
        let text_lower = text.to_lowercase();
        let context_lower = context.map(|c| c.to_lowercase()).unwrap_or_default();

        // Context hints win over the raw text
        if !context_lower.is_empty() && Self::matches_any(&context_lower, &["tool", "command"]) {
            return Ok(Classification {
                category: category::TOOL_USAGE.to_string(),
                confidence: 0.75,
            });
        }

        let (cat, confidence) = if Self::matches_any(&text_lower, ERROR_PATTERNS) {
            (category::ERROR_PATTERN, 0.7)
        } else if Self::matches_any(&text_lower, METADATA_PATTERNS) {
            (category::METADATA_TRANSFORMATION, 0.6)
        } else if Self::matches_any(&text_lower, CONFIG_PATTERNS) {
            (category::CONFIGURATION, 0.65)
        } else if Self::matches_any(&text_lower, CODE_PATTERNS) {
            (category::CODE_PATTERN, 0.8)
        } else {
            (category::GENERAL, 0.5)
        };

        Ok(Classification {
            category: cat.to_string(),
            confidence,
        })
    }
}
