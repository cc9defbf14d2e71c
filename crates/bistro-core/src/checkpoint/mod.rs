//! Per-thread checkpointing of state-machine state.
//!
//! `Checkpointer` wraps a [`CheckpointStore`] and is called after every
//! node transition, so a crashed or cancelled thread resumes at the last
//! completed node.

pub mod memory;
pub mod store;

use bistro_types::conversation::{Checkpoint, Conversation, Node};

pub use self::memory::InMemoryCheckpointStore;
pub use self::store::{CheckpointStore, ThreadInfo};

// ---------------------------------------------------------------------------
// Checkpointer
// ---------------------------------------------------------------------------

/// Generic over `S: CheckpointStore` so it works with any storage backend
/// (SQLite, in-memory). Every transition is persisted before the state
/// machine moves on.
pub struct Checkpointer<S: CheckpointStore> {
    store: S,
}

impl<S: CheckpointStore> Checkpointer<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Snapshot the thread after a transition into `node`.
    pub async fn save(
        &self,
        conversation: &Conversation,
        node: Node,
        round_trips: u32,
    ) -> Result<(), CheckpointError> {
        let checkpoint = Checkpoint::new(conversation.clone(), node, round_trips);
        self.store
            .save(&checkpoint)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(
            thread_id = %checkpoint.thread_id,
            node = %node,
            round_trips,
            turns = checkpoint.conversation.turns.len(),
            "checkpointed transition"
        );
        Ok(())
    }

    pub async fn restore(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        self.store
            .load(thread_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    /// Drop a thread's checkpoint. Returns `true` if one existed.
    pub async fn retire(&self, thread_id: &str) -> Result<bool, CheckpointError> {
        let existed = self
            .store
            .delete(thread_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        tracing::info!(thread_id, existed, "retired thread");
        Ok(existed)
    }

    pub async fn threads(&self) -> Result<Vec<ThreadInfo>, CheckpointError> {
        self.store
            .list_threads()
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint repository error: {0}")]
    Repository(String),
}
