//! Runtime selection of the checkpoint backend.

use std::path::Path;

use bistro_core::checkpoint::{CheckpointStore, InMemoryCheckpointStore, ThreadInfo};
use bistro_types::config::{CheckpointBackend, StorageConfig};
use bistro_types::conversation::Checkpoint;
use bistro_types::error::RepositoryError;

use crate::sqlite::checkpoint::SqliteCheckpointStore;
use crate::sqlite::pool::DatabasePool;

/// Either of the two checkpoint stores, chosen by `[storage] checkpoints`.
pub enum AnyCheckpointStore {
    Sqlite(SqliteCheckpointStore),
    Memory(InMemoryCheckpointStore),
}

impl AnyCheckpointStore {
    /// Open the configured backend. `ephemeral` forces the in-memory store.
    pub async fn open(
        config: &StorageConfig,
        data_dir: &Path,
        ephemeral: bool,
    ) -> Result<Self, sqlx::Error> {
        if ephemeral || config.checkpoints == CheckpointBackend::Memory {
            tracing::info!("using in-memory checkpoints; threads are lost on exit");
            return Ok(Self::Memory(InMemoryCheckpointStore::new()));
        }
        let pool = DatabasePool::open_in(data_dir, &config.database_file).await?;
        tracing::info!(path = %data_dir.join(&config.database_file).display(), "using sqlite checkpoints");
        Ok(Self::Sqlite(SqliteCheckpointStore::new(pool)))
    }

    pub fn backend(&self) -> CheckpointBackend {
        match self {
            Self::Sqlite(_) => CheckpointBackend::Sqlite,
            Self::Memory(_) => CheckpointBackend::Memory,
        }
    }
}

impl CheckpointStore for AnyCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        match self {
            Self::Sqlite(store) => store.save(checkpoint).await,
            Self::Memory(store) => store.save(checkpoint).await,
        }
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, RepositoryError> {
        match self {
            Self::Sqlite(store) => store.load(thread_id).await,
            Self::Memory(store) => store.load(thread_id).await,
        }
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, RepositoryError> {
        match self {
            Self::Sqlite(store) => store.delete(thread_id).await,
            Self::Memory(store) => store.delete(thread_id).await,
        }
    }

    async fn list_threads(&self) -> Result<Vec<ThreadInfo>, RepositoryError> {
        match self {
            Self::Sqlite(store) => store.list_threads().await,
            Self::Memory(store) => store.list_threads().await,
        }
    }
}
