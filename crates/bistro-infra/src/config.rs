//! Global configuration loader for Bistro.
//!
//! Reads `config.toml` from the data directory (`~/.bistro/` in production)
//! and deserializes it into [`GlobalConfig`]. Falls back to sensible defaults
//! when the file is missing or malformed.

use std::path::{Path, PathBuf};

use bistro_types::config::GlobalConfig;

/// Overrides the data directory.
pub const DATA_DIR_ENV: &str = "BISTRO_DATA_DIR";

/// Built-in host instructions, used unless `engine.instructions_file` is set.
pub const DEFAULT_INSTRUCTIONS: &str = "\
You are the virtual host for The Modern Fork. You help guests check availability, \
make, look up, change and cancel reservations, and answer menu questions.

- Ask for the date and party size before checking availability.
- To book, collect date, time, party size, name and phone; email is optional.
- Changes and cancellations need the confirmation id.
- Call the menu tool for dishes, prices, dietary tags and allergens.
- Quote times and prices exactly as the tools return them. Never invent data.
- If a tool reports an error, tell the guest and ask for whatever is missing.

Keep replies short and natural, as if speaking on the phone. Use bullet points \
for several options.";

/// `$BISTRO_DATA_DIR`, else `~/.bistro`, else `./.bistro`.
pub fn data_dir() -> PathBuf {
    match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".bistro"),
    }
}

/// Load global configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`GlobalConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - If the file exists and parses successfully, returns the parsed config.
pub async fn load_global_config(data_dir: &Path) -> GlobalConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            GlobalConfig::default()
        }
    }
}

/// Resolve the system instructions.
///
/// A relative `instructions_file` is taken from `data_dir`. An unreadable
/// or blank file is an error; there is no silent fallback once a file is
/// configured.
pub async fn load_instructions(config: &GlobalConfig, data_dir: &Path) -> anyhow::Result<String> {
    let Some(file) = &config.engine.instructions_file else {
        return Ok(DEFAULT_INSTRUCTIONS.to_string());
    };

    let path = data_dir.join(file);
    let text = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read instructions file {}: {e}", path.display()))?;
    if text.trim().is_empty() {
        anyhow::bail!("instructions file {} is empty", path.display());
    }
    Ok(text)
}
