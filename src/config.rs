//! Configuration for the dedupe tool.
//!
//! Loaded from TOML. Lookup order when no explicit file is given:
//! - `./dedupe.toml`
//! - `<config dir>/dedupe/config.toml` (e.g. `~/.config/dedupe/config.toml`)
//!
//! Missing files fall back to defaults; command-line flags override both.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::hash::HashKind;
use crate::core::scanner::ScanOptions;

const APP_NAME: &str = "dedupe";
const CONFIG_FILE_NAME: &str = "config.toml";
const LOCAL_CONFIG_FILE: &str = "dedupe.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config file {0}: {1}")]
    ParseError(PathBuf, String),

    #[error("Failed to write config file {0}: {1}")]
    WriteError(PathBuf, String),

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HashingConfig {
    pub kind: HashKind,
    /// Worker threads for the hashing pipeline; 0 picks one per spare core.
    pub workers: usize,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            kind: HashKind::Dct,
            workers: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// env_logger filter, e.g. "info" or "dedupe=debug".
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub hashing: HashingConfig,
    pub scan: ScanOptions,
    pub logging: LoggingConfig,
}

/// `<platform config dir>/dedupe`
pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME))
}

pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;
        Self::parse(&content).map_err(|e| match e {
            ConfigError::SerializeError(msg) => ConfigError::ParseError(path.to_path_buf(), msg),
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// First config file found in the lookup order, or defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::find_config_file() {
            Some(path) => {
                log::debug!("loading config from {}", path.display());
                Self::load(path)
            }
            None => Ok(Self::default()),
        }
    }

    fn find_config_file() -> Option<PathBuf> {
        std::iter::once(PathBuf::from(LOCAL_CONFIG_FILE))
            .chain(get_config_path())
            .find(|path| path.is_file())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteError(parent.to_path_buf(), e.to_string()))?;
        }
        fs::write(path, content).map_err(|e| ConfigError::WriteError(path.to_path_buf(), e.to_string()))
    }
}
