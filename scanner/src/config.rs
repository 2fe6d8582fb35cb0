//! Configuration management for the scanner
//!
//! YAML-backed config with sensible defaults; all paths are derived from one
//! data directory unless overridden.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScannerError};
use crate::types::TerminalSettings;

/// Environment variable pointing at a config file
const CONFIG_ENV_VAR: &str = "AURUM_SCANNER_CONFIG";

/// Scanner configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScannerConfig {
    /// Root data directory; vault, knowledge, checkpoints and sessions live
    /// underneath unless explicitly overridden
    pub data_dir: PathBuf,

    /// Vault directory override
    pub vault_dir: Option<PathBuf>,

    /// Brain knowledge directory override
    pub knowledge_dir: Option<PathBuf>,

    /// Checkpoint directory override
    pub checkpoint_dir: Option<PathBuf>,

    /// Session log directory override
    pub sessions_dir: Option<PathBuf>,

    /// Rich-list file (one address per line); optional
    pub rich_list_path: Option<PathBuf>,

    /// Salt file path override (defaults to `<data_dir>/.salt`)
    pub salt_path: Option<PathBuf>,

    /// Collaborator mode: "mock" is the only built-in
    pub collaborator_mode: String,

    /// Terminals created at startup
    pub terminal_count: usize,

    /// Settings applied to each created terminal
    pub terminal: TerminalSettings,

    /// Brain tuning
    pub brain: BrainConfig,
}

/// Brain tuning knobs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrainConfig {
    /// Epsilon for strategy selection
    pub exploration_rate: f64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./aurum_data"),
            vault_dir: None,
            knowledge_dir: None,
            checkpoint_dir: None,
            sessions_dir: None,
            rich_list_path: None,
            salt_path: None,
            collaborator_mode: "mock".to_string(), // only built-in mode
            terminal_count: 2,
            terminal: TerminalSettings::default(),
            brain: BrainConfig {
                exploration_rate: 0.2,
            },
        }
    }
}

impl ScannerConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ScannerError::Config(config::ConfigError::Foreign(Box::new(e))))?;

        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| ScannerError::Config(config::ConfigError::Foreign(Box::new(e))))?;

        Ok(config)
    }

    /// Load from the path in `AURUM_SCANNER_CONFIG`, falling back to defaults
    pub fn from_env_or_default() -> Self {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) => match Self::from_file(&path) {
                Ok(config) => {
                    tracing::info!("Loaded config from {} ({})", path, CONFIG_ENV_VAR);
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}, using defaults", path, e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| ScannerError::Config(config::ConfigError::Foreign(Box::new(e))))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn vault_dir(&self) -> PathBuf {
        self.vault_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("vault"))
    }

    pub fn knowledge_dir(&self) -> PathBuf {
        self.knowledge_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("knowledge"))
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.checkpoint_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("checkpoints"))
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.sessions_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("sessions"))
    }

    pub fn salt_path(&self) -> PathBuf {
        self.salt_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(".salt"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_paths_derive_from_data_dir() {
        let config = ScannerConfig::default();
        assert_eq!(config.vault_dir(), config.data_dir.join("vault"));
        assert_eq!(config.knowledge_dir(), config.data_dir.join("knowledge"));
        assert_eq!(config.checkpoint_dir(), config.data_dir.join("checkpoints"));
        assert_eq!(config.sessions_dir(), config.data_dir.join("sessions"));
        assert_eq!(config.salt_path(), config.data_dir.join(".salt"));
    }

    #[test]
    fn test_yaml_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scanner.yaml");

        let mut config = ScannerConfig::default();
        config.terminal_count = 5;
        config.brain.exploration_rate = 0.05;
        config.save_to_file(&path).unwrap();

        let loaded = ScannerConfig::from_file(&path).unwrap();
        assert_eq!(loaded.terminal_count, 5);
        assert_eq!(loaded.brain.exploration_rate, 0.05);
        assert_eq!(loaded.terminal.mode, config.terminal.mode);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = ScannerConfig::from_file("/nonexistent/scanner.yaml").unwrap_err();
        assert!(matches!(err, ScannerError::Config(_)));
    }
}
