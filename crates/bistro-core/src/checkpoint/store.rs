//! Checkpoint store trait definition.
//!
//! Defines the storage interface for per-thread checkpoints. The
//! infrastructure layer (bistro-infra) implements it with SQLite; an
//! in-memory store lives next to this trait.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bistro_types::conversation::{Checkpoint, Node};
use bistro_types::error::RepositoryError;

/// Listing entry for a stored thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub thread_id: String,
    pub node: Node,
    pub turns: usize,
    pub updated_at: DateTime<Utc>,
}

impl ThreadInfo {
    pub fn of(checkpoint: &Checkpoint) -> Self {
        Self {
            thread_id: checkpoint.thread_id.clone(),
            node: checkpoint.node,
            turns: checkpoint.conversation.turns.len(),
            updated_at: checkpoint.updated_at,
        }
    }
}

/// Keyed, last-write-wins storage of one checkpoint per thread.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
/// Callers serialize access per thread id; stores only need to be safe for
/// concurrent use across different thread ids.
pub trait CheckpointStore: Send + Sync {
    /// Insert or overwrite the checkpoint for `checkpoint.thread_id`.
    fn save(
        &self,
        checkpoint: &Checkpoint,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn load(
        &self,
        thread_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Checkpoint>, RepositoryError>> + Send;

    /// Delete a thread's checkpoint. Returns `true` if it existed.
    fn delete(
        &self,
        thread_id: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// All stored threads, most recently updated first.
    fn list_threads(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ThreadInfo>, RepositoryError>> + Send;
}
