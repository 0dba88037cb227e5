//! Persisted CLI configuration.
//!
//! Stored as JSON under the platform config directory
//! (e.g. `~/.config/kefctl/config.json`). Missing files yield defaults;
//! the core library never touches this - persistence is the CLI's job.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// CLI configuration loaded from JSON.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Last known speaker host, if one was saved.
    pub speaker_host: Option<String>,

    /// Speaker API port.
    pub port: u16,

    /// Volume change per `up` / `down` command.
    pub volume_step: u8,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            speaker_host: None,
            port: 80,
            volume_step: 5,
        }
    }
}

impl CliConfig {
    /// Loads configuration from `path`, or from the default location.
    /// A missing file is not an error; defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path()?,
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Saves the configuration to `path`, or to the default location,
    /// creating parent directories as needed.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path()?,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config dir: {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }
}

/// Default config file path under the platform config directory.
fn default_config_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().context("Could not determine the user config directory")?;
    Ok(dir.join("kefctl").join("config.json"))
}
