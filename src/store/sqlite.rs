//! SQLite-backed learned-data store

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{LearnedRecord, LearnedStore};

/// SQLite implementation of [`LearnedStore`]
pub struct SqliteLearnedStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLearnedStore {
    /// Open (or create) a store at the given path
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open learned-data db at {}", path.display()))?;

        // Enable WAL mode for better performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store, mainly for tests and throwaway sessions
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Initialize the database schema
    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS learned_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                category TEXT NOT NULL,
                content TEXT NOT NULL,
                source TEXT NOT NULL,
                metadata TEXT,
                user_prompt TEXT,
                score REAL NOT NULL DEFAULT 1.0,
                use_count INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(category, content)
            );

            CREATE INDEX IF NOT EXISTS idx_learned_category
                ON learned_data(category, score DESC);
            CREATE INDEX IF NOT EXISTS idx_learned_updated
                ON learned_data(updated_at DESC);
        "#,
        )?;

        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<LearnedRecord> {
        let created_at: String = row.get(8)?;
        let updated_at: String = row.get(9)?;
        Ok(LearnedRecord {
            id: row.get(0)?,
            category: row.get(1)?,
            content: row.get(2)?,
            source: row.get(3)?,
            metadata: row.get(4)?,
            user_prompt: row.get(5)?,
            score: row.get(6)?,
            use_count: row.get(7)?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }
}

/// Parse an RFC 3339 timestamp, falling back to now on malformed rows
fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl LearnedStore for SqliteLearnedStore {
    async fn insert_or_update<'a>(
        &self,
        category: &str,
        content: &str,
        source: &str,
        metadata: Option<&'a str>,
        increment_score: bool,
        user_prompt: Option<&'a str>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();
        let bump = if increment_score { 1.0 } else { 0.0 };

        conn.execute(
            r#"INSERT INTO learned_data
               (category, content, source, metadata, user_prompt, score, use_count, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, 1.0, 1, ?6, ?6)
               ON CONFLICT(category, content) DO UPDATE SET
                   source = excluded.source,
                   metadata = COALESCE(excluded.metadata, learned_data.metadata),
                   user_prompt = COALESCE(excluded.user_prompt, learned_data.user_prompt),
                   score = learned_data.score + ?7,
                   use_count = learned_data.use_count + 1,
                   updated_at = excluded.updated_at"#,
            params![category, content, source, metadata, user_prompt, now, bump],
        )
        .context("Failed to upsert learned record")?;

        Ok(())
    }

    async fn decrement_score(&self, entry_id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();

        let changed = conn
            .execute(
                "UPDATE learned_data SET score = score - 1.0, updated_at = ?2 WHERE id = ?1",
                params![entry_id, now],
            )
            .context("Failed to decrement score")?;

        if changed == 0 {
            anyhow::bail!("No learned record with id {}", entry_id);
        }
        Ok(())
    }

    async fn get_by_category(&self, category: &str, limit: usize) -> Result<Vec<LearnedRecord>> {
        let conn = self.conn.lock().await;

        let mut stmt = conn.prepare(
            r#"SELECT id, category, content, source, metadata, user_prompt,
                      score, use_count, created_at, updated_at
               FROM learned_data
               WHERE category = ?1
               ORDER BY score DESC, updated_at DESC
               LIMIT ?2"#,
        )?;

        let records = stmt
            .query_map(params![category, limit as i64], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read learned records")?;

        Ok(records)
    }
}
