//! Configuration management
//!
//! Manages learning-pipeline settings: gating defaults, provider identity,
//! and the learned-data database location.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Learning gate settings
    #[serde(default)]
    pub learning: LearningConfig,
    /// Storage settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Learning gate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Whether learning input is accepted at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// This instance's provider identity
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Provider currently serving the session; empty when none
    #[serde(default)]
    pub active_provider: String,
}

fn default_enabled() -> bool {
    true
}

fn default_provider() -> String {
    "sidelearn".to_string()
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            provider: default_provider(),
            active_provider: String::new(),
        }
    }
}

/// Storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the learned-data SQLite database
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

fn default_database_path() -> PathBuf {
    data_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("learned.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

impl Config {
    /// Load configuration from file, creating defaults if missing
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .context("Failed to read config file")?;
            let config: Config = toml::from_str(&contents)
                .context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = config_path()?;
        let parent = config_path
            .parent()
            .context("Config path has no parent")?;

        std::fs::create_dir_all(parent)
            .context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "sidelearn", "sidelearn")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "sidelearn", "sidelearn")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.learning.enabled);
        assert_eq!(config.learning.provider, "sidelearn");
        assert!(config.learning.active_provider.is_empty());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.learning.provider, config.learning.provider);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("[learning]\nenabled = false\n").unwrap();
        assert!(!config.learning.enabled);
        assert_eq!(config.learning.provider, "sidelearn");
    }
}
