//! In-memory checkpoint store backed by `DashMap`.

use dashmap::DashMap;

use bistro_types::conversation::Checkpoint;
use bistro_types::error::RepositoryError;

use super::store::{CheckpointStore, ThreadInfo};

/// Process-local checkpoints. Lost on exit; used by tests and `--ephemeral` runs.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: DashMap<String, Checkpoint>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        self.checkpoints
            .insert(checkpoint.thread_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, RepositoryError> {
        Ok(self.checkpoints.get(thread_id).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, RepositoryError> {
        Ok(self.checkpoints.remove(thread_id).is_some())
    }

    async fn list_threads(&self) -> Result<Vec<ThreadInfo>, RepositoryError> {
        let mut threads: Vec<ThreadInfo> = self
            .checkpoints
            .iter()
            .map(|entry| ThreadInfo::of(entry.value()))
            .collect();
        threads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(threads)
    }
}
