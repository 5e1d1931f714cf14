use anyhow::Context;
use serde::de::DeserializeOwned;
use std::path::Path;
use trainer_core::config::TrainerConfig;

/// Read and deserialize a JSON export, naming `what` on failure.
pub fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> anyhow::Result<T> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {what} from {}", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("failed to parse {what} in {}", path.display()))
}

/// Config for commands that evaluate something: invalid configs are refused.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<TrainerConfig> {
    match path {
        Some(p) => TrainerConfig::load_validated(p).context("failed to load config"),
        None => Ok(TrainerConfig::default()),
    }
}
