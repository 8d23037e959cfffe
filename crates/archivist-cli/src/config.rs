use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use archivist_history::DEFAULT_HISTORY_PAGE_SIZE;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
/// Runtime configuration loaded from `archivist.toml`.
pub struct ArchivistConfig {
    pub command_prefix: String,
    pub bot_admins: Vec<String>,
    pub asynchronous_history: bool,
    pub registrations_path: PathBuf,
    pub catalog_dir: PathBuf,
    pub history_page_size: usize,
    pub history_page_delay_ms: u64,
}

impl Default for ArchivistConfig {
    fn default() -> Self {
        Self {
            command_prefix: "ddg ".to_string(),
            bot_admins: Vec::new(),
            asynchronous_history: false,
            registrations_path: PathBuf::from(".archivist/registrations.json"),
            catalog_dir: PathBuf::from(".archivist/catalog"),
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
            history_page_delay_ms: 0,
        }
    }
}

impl ArchivistConfig {
    fn validate(&self) -> Result<()> {
        if self.command_prefix.trim().is_empty() {
            bail!("command_prefix must not be empty");
        }
        if self.history_page_size == 0 {
            bail!("history_page_size must be greater than 0");
        }
        Ok(())
    }
}

pub fn load_archivist_config(path: &Path) -> Result<ArchivistConfig> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "config file not found; using defaults"
        );
        return Ok(ArchivistConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config = toml::from_str::<ArchivistConfig>(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config in {}", path.display()))?;
    Ok(config)
}
