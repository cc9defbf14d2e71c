//! SQLite checkpoint store implementation.
//!
//! Implements `CheckpointStore` from `bistro-core`. Each thread owns one row;
//! the conversation is stored as JSON text and saving upserts the row.

use bistro_core::checkpoint::{CheckpointStore, ThreadInfo};
use bistro_types::conversation::{Checkpoint, Conversation, Node};
use bistro_types::error::RepositoryError;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `CheckpointStore`.
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    pool: DatabasePool,
}

impl SqliteCheckpointStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct CheckpointRow {
    thread_id: String,
    node: String,
    round_trips: i64,
    conversation: String,
    updated_at: String,
}

impl CheckpointRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            thread_id: row.try_get("thread_id")?,
            node: row.try_get("node")?,
            round_trips: row.try_get("round_trips")?,
            conversation: row.try_get("conversation")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_checkpoint(self) -> Result<Checkpoint, RepositoryError> {
        let conversation: Conversation = serde_json::from_str(&self.conversation)
            .map_err(|e| RepositoryError::Query(format!("invalid conversation JSON: {e}")))?;
        Ok(Checkpoint {
            thread_id: self.thread_id,
            conversation,
            node: parse_node(&self.node)?,
            round_trips: u32::try_from(self.round_trips)
                .map_err(|e| RepositoryError::Query(format!("invalid round_trips: {e}")))?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct ThreadRow {
    thread_id: String,
    node: String,
    turn_count: i64,
    updated_at: String,
}

impl ThreadRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            thread_id: row.try_get("thread_id")?,
            node: row.try_get("node")?,
            turn_count: row.try_get("turn_count")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_info(self) -> Result<ThreadInfo, RepositoryError> {
        Ok(ThreadInfo {
            thread_id: self.thread_id,
            node: parse_node(&self.node)?,
            turns: usize::try_from(self.turn_count)
                .map_err(|e| RepositoryError::Query(format!("invalid turn_count: {e}")))?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_node(s: &str) -> Result<Node, RepositoryError> {
    s.parse().map_err(RepositoryError::Query)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width timestamps so `ORDER BY updated_at` sorts chronologically.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ---------------------------------------------------------------------------
// CheckpointStore implementation
// ---------------------------------------------------------------------------

impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        let conversation = serde_json::to_string(&checkpoint.conversation)
            .map_err(|e| RepositoryError::Query(format!("failed to serialize conversation: {e}")))?;

        sqlx::query(
            r#"INSERT INTO checkpoints (thread_id, node, round_trips, turn_count, conversation, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(thread_id) DO UPDATE SET
                   node = excluded.node,
                   round_trips = excluded.round_trips,
                   turn_count = excluded.turn_count,
                   conversation = excluded.conversation,
                   updated_at = excluded.updated_at"#,
        )
        .bind(&checkpoint.thread_id)
        .bind(checkpoint.node.to_string())
        .bind(i64::from(checkpoint.round_trips))
        .bind(checkpoint.conversation.turns.len() as i64)
        .bind(&conversation)
        .bind(format_datetime(&checkpoint.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, RepositoryError> {
        let row = sqlx::query(
            "SELECT thread_id, node, round_trips, conversation, updated_at FROM checkpoints WHERE thread_id = ?",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let row = CheckpointRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(row.into_checkpoint()?))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_threads(&self) -> Result<Vec<ThreadInfo>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT thread_id, node, turn_count, updated_at FROM checkpoints ORDER BY updated_at DESC, thread_id",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                ThreadRow::from_row(row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_info()
            })
            .collect()
    }
}
