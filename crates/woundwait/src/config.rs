//! Configuration loading
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config: ~/.config/woundwait/config.toml
//! 3. Project config: .woundwait/config.toml
//! 4. Environment variables: `WOUNDWAIT_*`
//! 5. CLI flags (command-specific)
//!
//! # Example Config
//!
//! ```toml
//! input_dir = "input"
//! log_file = "database.log"
//! format = "text"
//! dump_tables = false
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// How decisions are printed on stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// One human-readable status line per decision
    #[default]
    Text,
    /// One JSON object per decision
    Json,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(Error::InvalidConfig(format!(
                "Invalid format: {s}. Must be one of: text, json"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Directory scanned for `*.txt` schedules when no file is given
    pub input_dir: PathBuf,
    /// JSON-lines event log; empty disables it
    pub log_file: String,
    pub format: OutputFormat,
    /// Append lock and transaction tables to the log after every operation
    pub dump_tables: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("input"),
            log_file: "database.log".to_string(),
            format: OutputFormat::Text,
            dump_tables: false,
        }
    }
}

/// Only keys present in a file are `Some`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialConfig {
    pub input_dir: Option<PathBuf>,
    pub log_file: Option<String>,
    pub format: Option<OutputFormat>,
    pub dump_tables: Option<bool>,
}

impl Config {
    /// Event log path, if logging is enabled
    #[must_use]
    pub fn log_path(&self) -> Option<PathBuf> {
        if self.log_file.trim().is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.log_file))
        }
    }

    fn merge_partial(&mut self, partial: PartialConfig) {
        if let Some(input_dir) = partial.input_dir {
            self.input_dir = input_dir;
        }
        if let Some(log_file) = partial.log_file {
            self.log_file = log_file;
        }
        if let Some(format) = partial.format {
            self.format = format;
        }
        if let Some(dump_tables) = partial.dump_tables {
            self.dump_tables = dump_tables;
        }
    }

    fn apply_env_vars(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var("WOUNDWAIT_INPUT_DIR") {
            self.input_dir = PathBuf::from(value);
        }

        if let Ok(value) = std::env::var("WOUNDWAIT_LOG_FILE") {
            self.log_file = value;
        }

        if let Ok(value) = std::env::var("WOUNDWAIT_FORMAT") {
            self.format = value.parse()?;
        }

        if let Ok(value) = std::env::var("WOUNDWAIT_DUMP_TABLES") {
            self.dump_tables = value.parse().map_err(|e| {
                Error::InvalidConfig(format!("Invalid WOUNDWAIT_DUMP_TABLES value: {e}"))
            })?;
        }

        Ok(())
    }
}

/// Load configuration for a project rooted at `project_dir`
///
/// # Errors
///
/// Returns error if:
/// - A config file is malformed TOML or has unknown keys
/// - An environment override has an invalid value
pub async fn load_config(project_dir: &Path) -> Result<Config> {
    let mut config = Config::default();

    for path in [global_config_path(), Some(project_config_path(project_dir))]
        .into_iter()
        .flatten()
    {
        match load_partial_toml_file(&path).await {
            Ok(partial) => config.merge_partial(partial),
            Err(Error::Io(_)) => {
                // Missing file - skip silently
            }
            Err(e) => return Err(e),
        }
    }

    config.apply_env_vars()?;
    Ok(config)
}

fn project_config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(".woundwait").join("config.toml")
}

fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "woundwait")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load a TOML file into a [`PartialConfig`]
///
/// # Errors
///
/// Returns error if:
/// - File cannot be read
/// - File exceeds 1 MB
/// - TOML is malformed or contains unknown keys
pub async fn load_partial_toml_file(path: &Path) -> Result<PartialConfig> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        Error::Io(format!(
            "Failed to read config file metadata {}: {e}",
            path.display()
        ))
    })?;

    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(Error::InvalidConfig(format!(
            "Config file {} exceeds maximum size of {MAX_CONFIG_FILE_SIZE} bytes",
            path.display()
        )));
    }

    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::Io(format!("Failed to read config file {}: {e}", path.display()))
    })?;

    toml::from_str(&content).map_err(|e| {
        Error::InvalidConfig(format!("Failed to parse config file {}: {e}", path.display()))
    })
}
