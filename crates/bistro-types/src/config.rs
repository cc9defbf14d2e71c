//! Global configuration types for Bistro.
//!
//! `GlobalConfig` represents the top-level `config.toml`. Every field has
//! a default so an empty or missing file is a valid configuration.

use serde::{Deserialize, Serialize};

/// Top-level configuration, loaded from `~/.bistro/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// How turn tokens are counted for the budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterKind {
    /// Roughly four characters per token.
    #[default]
    Chars,
    /// Every turn counts as one unit.
    Turns,
}

/// How evicted history is condensed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarizerKind {
    /// Extractive: the header plus the first chunk of the transcript.
    #[default]
    Digest,
    /// Ask the model to condense the first chunk.
    Model,
}

/// Orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Token budget for the system instructions plus the retained window.
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    /// Maximum AGENT/TOOLS round trips per external message.
    #[serde(default = "default_max_round_trips")]
    pub max_round_trips: u32,
    /// Emit a status turn before running tools.
    #[serde(default = "default_true")]
    pub narration: bool,
    /// Chunk size (characters) for summarizing evicted history.
    #[serde(default = "default_summary_chunk_chars")]
    pub summary_chunk_chars: usize,
    #[serde(default)]
    pub counter: CounterKind,
    #[serde(default)]
    pub summarizer: SummarizerKind,
    /// Replaces the built-in system instructions when set.
    #[serde(default)]
    pub instructions_file: Option<String>,
}

fn default_token_budget() -> usize {
    4000
}

fn default_max_round_trips() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_summary_chunk_chars() -> usize {
    4096
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            max_round_trips: default_max_round_trips(),
            narration: true,
            summary_chunk_chars: default_summary_chunk_chars(),
            counter: CounterKind::default(),
            summarizer: SummarizerKind::default(),
            instructions_file: None,
        }
    }
}

/// Language-model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
    /// Total attempts per invocation, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Environment variable holding the provider API key.
    #[serde(default = "default_model_key_env")]
    pub api_key_env: String,
}

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f64 {
    0.7
}

fn default_model_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_model_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_model_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            api_key_env: default_model_key_env(),
        }
    }
}

/// Reservation backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    #[serde(default = "default_backend_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_backend_url() -> String {
    "http://localhost:4000/graphql".to_string()
}

fn default_backend_key_env() -> String {
    "BISTRO_BACKEND_KEY".to_string()
}

fn default_tool_timeout_secs() -> u64 {
    15
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            api_key_env: default_backend_key_env(),
            timeout_secs: default_tool_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub checkpoints: CheckpointBackend,
    /// SQLite file name, relative to the data directory.
    #[serde(default = "default_database_file")]
    pub database_file: String,
}

fn default_database_file() -> String {
    "bistro.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            checkpoints: CheckpointBackend::default(),
            database_file: default_database_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_config_default_values() {
        let config = GlobalConfig::default();
        assert_eq!(config.engine.token_budget, 4000);
        assert_eq!(config.engine.max_round_trips, 10);
        assert!(config.engine.narration);
        assert_eq!(config.model.timeout_secs, 30);
        assert_eq!(config.model.max_attempts, 3);
        assert_eq!(config.storage.checkpoints, CheckpointBackend::Sqlite);
    }

    #[test]
    fn test_global_config_deserialize_with_defaults() {
        let config: GlobalConfig = toml::from_str("").unwrap();
        assert_eq!(config.engine.summary_chunk_chars, 4096);
        assert_eq!(config.engine.counter, CounterKind::Chars);
        assert_eq!(config.model.api_key_env, "ANTHROPIC_API_KEY");
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_global_config_deserialize_with_values() {
        let toml_str = r#"
[engine]
token_budget = 1200
max_round_trips = 4
narration = false
counter = "turns"
summarizer = "model"

[model]
model = "claude-haiku"
temperature = 0.0
max_attempts = 5

[tools]
backend_url = "https://bistro.example/graphql"

[storage]
checkpoints = "memory"
"#;
        let config: GlobalConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.token_budget, 1200);
        assert_eq!(config.engine.max_round_trips, 4);
        assert!(!config.engine.narration);
        assert_eq!(config.engine.counter, CounterKind::Turns);
        assert_eq!(config.engine.summarizer, SummarizerKind::Model);
        assert_eq!(config.model.model, "claude-haiku");
        assert_eq!(config.model.max_attempts, 5);
        assert_eq!(config.model.timeout_secs, 30);
        assert_eq!(config.tools.backend_url, "https://bistro.example/graphql");
        assert_eq!(config.storage.checkpoints, CheckpointBackend::Memory);
        assert_eq!(config.storage.database_file, "bistro.db");
    }
}
