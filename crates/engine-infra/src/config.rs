//! Engine configuration loader.
//!
//! Reads `engine.toml` from the data directory (`~/.engine/` by default) and
//! deserializes it into [`EngineConfig`]. Falls back to
//! [`EngineConfig::default()`] when the file is missing or malformed.

use std::path::Path;

use engine_types::config::EngineConfig;

/// Load engine configuration from `{data_dir}/engine.toml`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - If the file exists and parses successfully, returns the parsed config
///   (missing fields fall back to their individual defaults, see
///   [`EngineConfig`]'s field-level `#[serde(default = ...)]` attributes).
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("engine.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No engine.toml found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}
