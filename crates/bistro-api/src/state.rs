//! Application state shared across CLI commands and HTTP handlers.
//!
//! `AppState` owns the conversation engine and the loaded configuration.
//! It is built once at startup and cloned cheaply into handlers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use secrecy::SecretString;

use bistro_core::ConversationEngine;
use bistro_core::agent::orchestrator::{EngineSettings, Orchestrator};
use bistro_core::agent::summarizer::AnySummarizer;
use bistro_core::agent::token_counter::counter_for;
use bistro_core::checkpoint::Checkpointer;
use bistro_core::llm::invoker::{InvokePolicy, ModelInvoker, ModelSettings};
use bistro_core::tool::executor::ToolExecutor;
use bistro_infra::config::{data_dir, load_global_config, load_instructions};
use bistro_infra::llm::{create_provider, resolve_api_key};
use bistro_infra::store::AnyCheckpointStore;
use bistro_infra::tools::{BackendClient, reservation_registry};
use bistro_types::config::GlobalConfig;

/// The engine as wired by the binary.
pub type Engine = ConversationEngine<AnyCheckpointStore, AnySummarizer>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub config: Arc<GlobalConfig>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Load configuration and wire every collaborator of the engine.
    ///
    /// `ephemeral` keeps checkpoints in memory regardless of configuration.
    pub async fn init(ephemeral: bool) -> anyhow::Result<Self> {
        let data_dir = data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let config = load_global_config(&data_dir).await;
        let instructions = load_instructions(&config, &data_dir).await?;

        let provider = create_provider(&config.model, resolve_api_key(&config.model))
            .with_context(|| format!("failed to set up model provider '{}'", config.model.provider))?;
        let invoker = Arc::new(ModelInvoker::new(
            provider,
            ModelSettings::from_config(&config.model),
            InvokePolicy::from_config(&config.model),
        ));

        let backend_key = std::env::var(&config.tools.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from);
        let client = BackendClient::new(&config.tools, backend_key)?;
        let registry = reservation_registry(client)?;
        let executor = ToolExecutor::new(
            Arc::new(registry),
            Duration::from_secs(config.tools.timeout_secs),
        );

        let store = AnyCheckpointStore::open(&config.storage, &data_dir, ephemeral)
            .await
            .context("failed to open checkpoint store")?;

        let orchestrator = Orchestrator::new(
            Arc::clone(&invoker),
            executor,
            AnySummarizer::from_config(config.engine.summarizer, &invoker),
            Checkpointer::new(store),
            counter_for(config.engine.counter),
            EngineSettings::from_config(&config.engine, instructions),
        );

        tracing::info!(
            data_dir = %data_dir.display(),
            model = %config.model.model,
            backend = %config.tools.backend_url,
            "engine ready"
        );

        Ok(Self {
            engine: ConversationEngine::new(orchestrator),
            config: Arc::new(config),
            data_dir,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bistro_core::checkpoint::InMemoryCheckpointStore;
    use bistro_core::llm::box_provider::BoxLlmProvider;
    use bistro_core::llm::scripted::{ScriptedProvider, ScriptedReply};
    use bistro_core::tool::registry::ToolRegistry;
    use bistro_infra::config::DEFAULT_INSTRUCTIONS;
    use bistro_types::config::CheckpointBackend;
    use std::path::Path;

    /// State over a scripted model, no tools and in-memory checkpoints.
    pub(crate) fn scripted_state(replies: Vec<ScriptedReply>) -> AppState {
        let store = AnyCheckpointStore::Memory(InMemoryCheckpointStore::new());
        state_with_store(replies, store, PathBuf::from("."))
    }

    /// Same as [`scripted_state`], but checkpoints go to SQLite under `dir`.
    pub(crate) async fn sqlite_state(replies: Vec<ScriptedReply>, dir: &Path) -> AppState {
        let config = GlobalConfig::default();
        let store = AnyCheckpointStore::open(&config.storage, dir, false).await.unwrap();
        assert_eq!(store.backend(), CheckpointBackend::Sqlite);
        state_with_store(replies, store, dir.to_path_buf())
    }

    fn state_with_store(replies: Vec<ScriptedReply>, store: AnyCheckpointStore, data_dir: PathBuf) -> AppState {
        let config = GlobalConfig::default();
        let invoker = Arc::new(ModelInvoker::new(
            BoxLlmProvider::new(ScriptedProvider::new(replies)),
            ModelSettings::from_config(&config.model),
            InvokePolicy::from_config(&config.model),
        ));
        let orchestrator = Orchestrator::new(
            Arc::clone(&invoker),
            ToolExecutor::new(Arc::new(ToolRegistry::new()), Duration::from_secs(1)),
            AnySummarizer::from_config(config.engine.summarizer, &invoker),
            Checkpointer::new(store),
            counter_for(config.engine.counter),
            EngineSettings::from_config(&config.engine, DEFAULT_INSTRUCTIONS),
        );
        AppState {
            engine: ConversationEngine::new(orchestrator),
            config: Arc::new(config),
            data_dir,
        }
    }

    #[tokio::test]
    async fn test_scripted_state_runs_a_turn() {
        let state = scripted_state(vec![ScriptedReply::text("We open at five.")]);
        let (_events, report) = state.engine.submit("t1", "when do you open?").collect().await;
        assert_eq!(report.unwrap().reply_text().as_deref(), Some("We open at five."));
    }
}
