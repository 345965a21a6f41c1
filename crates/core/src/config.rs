//! Configuration file handling
//!
//! The config file is TOML, stored in `$CS_CONFIG_DIR/config.toml` or in
//! the platform config directory (`~/.config/cloudsync/config.toml` on
//! Linux).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::alias::Alias;
use crate::error::{Error, Result};

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "CS_CONFIG_DIR";

const CONFIG_FILE_NAME: &str = "config.toml";
const CONFIG_VERSION: u32 = 1;

/// Default ceiling on the number of entries a single sync run may touch
pub const DEFAULT_MAX_SYNC_NUMBERS: usize = 1_000_000;

/// Default size of the transfer worker pool
pub const DEFAULT_ROUTINES: usize = 5;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub sync: SyncDefaults,

    #[serde(default)]
    pub aliases: Vec<Alias>,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            defaults: Defaults::default(),
            sync: SyncDefaults::default(),
            aliases: Vec::new(),
        }
    }
}

/// Output defaults, overridable on the command line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// "human" or "json"
    pub output: String,
    /// "auto", "always" or "never"
    pub color: String,
    pub progress: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: "human".to_string(),
            color: "auto".to_string(),
            progress: true,
        }
    }
}

/// Settings for the `sync` command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncDefaults {
    pub max_sync_numbers: usize,
    pub routines: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_dir: Option<PathBuf>,
    /// Bytes at which transfers become multipart and resumable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bigfile_threshold: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part_size: Option<u64>,
}

impl Default for SyncDefaults {
    fn default() -> Self {
        Self {
            max_sync_numbers: DEFAULT_MAX_SYNC_NUMBERS,
            routines: DEFAULT_ROUTINES,
            checkpoint_dir: None,
            bigfile_threshold: None,
            part_size: None,
        }
    }
}

/// Loads and saves the config file
#[derive(Debug, Clone)]
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    /// Resolve the config file location from the environment
    pub fn new() -> Result<Self> {
        let dir = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::config_dir()
                .ok_or_else(|| Error::Config("Cannot determine config directory".into()))?
                .join("cloudsync"),
        };
        Ok(Self::with_path(dir.join(CONFIG_FILE_NAME)))
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the config; a missing file yields the defaults
    pub fn load(&self) -> Result<Config> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
            Err(e) => return Err(e.into()),
        };

        let config: Config = toml::from_str(&content)?;
        if config.version > CONFIG_VERSION {
            return Err(Error::Config(format!(
                "Unsupported config version {} (expected <= {CONFIG_VERSION})",
                config.version
            )));
        }
        Ok(config)
    }

    /// Write the config through a temp file so a crash never truncates it
    pub fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;

        tracing::debug!(path = %self.path.display(), "Saved config");
        Ok(())
    }
}
