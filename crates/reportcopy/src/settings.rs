//! Configuration and settings management

use crate::scanner::{ScanPattern, INCLUDE_ALL_PATTERN};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub transfer: TransferSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferSettings {
    /// Number of copy workers, 0 copies on the calling thread
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Deadline for each worker
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_includes")]
    pub includes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excludes: Option<String>,
    #[serde(default = "default_true")]
    pub default_excludes: bool,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            timeout_secs: default_timeout_secs(),
            includes: default_includes(),
            excludes: None,
            default_excludes: default_true(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_includes() -> String {
    INCLUDE_ALL_PATTERN.to_string()
}

fn default_true() -> bool {
    true
}

impl TransferSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn pattern(&self) -> ScanPattern {
        let pattern = ScanPattern::new(&self.includes).with_default_excludes(self.default_excludes);
        match &self.excludes {
            Some(excludes) => pattern.with_excludes(excludes),
            None => pattern,
        }
    }
}

impl Settings {
    /// Load settings from a file, or return defaults if file doesn't exist
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;

        let settings: Settings = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse settings from {}", path.display()))?;

        Ok(settings)
    }

    /// Save settings to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let contents = self.to_toml()?;

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;

        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize settings")
    }

    /// Get the default settings file path
    pub fn default_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("reportcopy");

        config_dir.join("settings.toml")
    }
}
