use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use archivist_core::write_text_atomic;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const CHANNEL_REGISTRATION_SCHEMA_VERSION: u32 = 1;
pub const CHANNEL_REGISTRATION_FILE_NAME: &str = "registrations.json";

fn default_allow_commands() -> bool {
    true
}

fn channel_registration_schema_version() -> u32 {
    CHANNEL_REGISTRATION_SCHEMA_VERSION
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Per-channel configuration enabling bot commands and history cataloging.
pub struct ChannelRegistration {
    #[serde(default = "default_allow_commands")]
    pub allow_commands: bool,
    #[serde(default)]
    pub local_admins: Vec<String>,
    #[serde(default)]
    pub label: Option<String>,
}

impl Default for ChannelRegistration {
    fn default() -> Self {
        Self {
            allow_commands: true,
            local_admins: Vec::new(),
            label: None,
        }
    }
}

impl ChannelRegistration {
    pub fn has_local_admin(&self, actor_id: &str) -> bool {
        self.local_admins
            .iter()
            .any(|admin| admin.trim() == actor_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// On-disk registration document; read-only once loaded by the orchestrator.
pub struct ChannelRegistrationFile {
    #[serde(default = "channel_registration_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelRegistration>,
    #[serde(default)]
    pub admin_channels: BTreeSet<String>,
}

impl Default for ChannelRegistrationFile {
    fn default() -> Self {
        Self {
            schema_version: CHANNEL_REGISTRATION_SCHEMA_VERSION,
            channels: BTreeMap::new(),
            admin_channels: BTreeSet::new(),
        }
    }
}

impl ChannelRegistrationFile {
    pub fn registration(&self, channel_id: &str) -> Option<&ChannelRegistration> {
        self.channels.get(channel_id.trim())
    }

    pub fn is_admin_channel(&self, channel_id: &str) -> bool {
        self.admin_channels.contains(channel_id.trim())
    }

    /// Registered channel ids in stable order.
    pub fn channel_ids(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    fn validate(&self) -> Result<()> {
        if self.schema_version != CHANNEL_REGISTRATION_SCHEMA_VERSION {
            bail!(
                "unsupported channel registration schema_version {} (expected {})",
                self.schema_version,
                CHANNEL_REGISTRATION_SCHEMA_VERSION
            );
        }
        for channel_id in self.channels.keys().chain(self.admin_channels.iter()) {
            if channel_id.trim().is_empty() || channel_id.trim() != channel_id {
                bail!("channel id '{channel_id}' must be non-empty without surrounding whitespace");
            }
        }
        Ok(())
    }
}

pub fn default_channel_registration_path(state_dir: &Path) -> PathBuf {
    state_dir.join(CHANNEL_REGISTRATION_FILE_NAME)
}

/// Loads the registration document; a missing file yields an empty registry.
pub fn load_channel_registrations(path: &Path) -> Result<ChannelRegistrationFile> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "channel registrations not found; no channels are registered"
        );
        return Ok(ChannelRegistrationFile::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let parsed = serde_json::from_str::<ChannelRegistrationFile>(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    parsed
        .validate()
        .with_context(|| format!("invalid channel registrations in {}", path.display()))?;
    debug!(
        path = %path.display(),
        channels = parsed.channels.len(),
        admin_channels = parsed.admin_channels.len(),
        "loaded channel registrations"
    );
    Ok(parsed)
}

pub fn save_channel_registrations(path: &Path, file: &ChannelRegistrationFile) -> Result<()> {
    file.validate()?;
    let mut payload =
        serde_json::to_string_pretty(file).context("failed to encode channel registrations")?;
    payload.push('\n');
    write_text_atomic(path, &payload)
}
