//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/uplens/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/uplens/` (~/.config/uplens/)
//! - Data: `$XDG_DATA_HOME/uplens/` (~/.local/share/uplens/)
//! - State/Logs: `$XDG_STATE_HOME/uplens/` (~/.local/state/uplens/)

use crate::error::{Error, Result};
use crate::rollup::FallbackPolicy;
use crate::types::ChatMode;
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Ingestion configuration
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Rollup / fallback configuration
    #[serde(default)]
    pub rollup: RollupConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Ingestion configuration
#[derive(Debug, Deserialize)]
pub struct IngestConfig {
    /// Override for the raw export directory
    pub raw_dir: Option<PathBuf>,

    /// Override for the processed-files directory
    pub processed_dir: Option<PathBuf>,

    /// Move files to the processed directory after a successful ingest
    #[serde(default = "default_move_processed")]
    pub move_processed: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            raw_dir: None,
            processed_dir: None,
            move_processed: default_move_processed(),
        }
    }
}

fn default_move_processed() -> bool {
    true
}

/// Rollup configuration, mostly the synthetic-fallback shares.
///
/// The share values are display placeholders, not measurements; they
/// are normalized to sum to 1.0 when converted into a policy.
#[derive(Debug, Deserialize)]
pub struct RollupConfig {
    /// (model name -> share) for the synthetic model distribution
    #[serde(default = "default_model_shares")]
    pub model_shares: Vec<ModelShare>,

    /// (mode name -> share) for the synthetic chat-mode distribution
    #[serde(default = "default_mode_shares")]
    pub mode_shares: Vec<ModeShare>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelShare {
    pub model: String,
    pub share: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModeShare {
    pub mode: String,
    pub share: f64,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            model_shares: default_model_shares(),
            mode_shares: default_mode_shares(),
        }
    }
}

fn default_model_shares() -> Vec<ModelShare> {
    FallbackPolicy::default()
        .model_shares
        .into_iter()
        .map(|(model, share)| ModelShare { model, share })
        .collect()
}

fn default_mode_shares() -> Vec<ModeShare> {
    FallbackPolicy::default()
        .mode_shares
        .into_iter()
        .map(|(mode, share)| ModeShare {
            mode: mode.as_str().to_string(),
            share,
        })
        .collect()
}

impl RollupConfig {
    /// Convert to a normalized fallback policy. Unknown mode names are
    /// a configuration error rather than being silently dropped.
    pub fn fallback_policy(&self) -> Result<FallbackPolicy> {
        let model_shares = self
            .model_shares
            .iter()
            .map(|m| (m.model.clone(), m.share))
            .collect();

        let mut mode_shares = Vec::with_capacity(self.mode_shares.len());
        for m in &self.mode_shares {
            let mode = ChatMode::from_str(&m.mode)
                .map_err(|e| Error::Config(format!("rollup.mode_shares: {}", e)))?;
            mode_shares.push((mode, m.share));
        }

        Ok(FallbackPolicy {
            model_shares,
            mode_shares,
        }
        .normalized())
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/uplens/config.toml` (~/.config/uplens/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("uplens").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database and raw files)
    ///
    /// `$XDG_DATA_HOME/uplens/` (~/.local/share/uplens/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("uplens")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/uplens/` (~/.local/state/uplens/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("uplens")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/uplens/usage.db` (~/.local/share/uplens/usage.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("usage.db")
    }

    /// Returns the raw export directory, honoring the config override
    pub fn raw_data_dir(&self) -> PathBuf {
        self.ingest
            .raw_dir
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("raw"))
    }

    /// Returns the processed-files directory, honoring the override
    pub fn processed_dir(&self) -> PathBuf {
        self.ingest
            .processed_dir
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("processed"))
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/uplens/uplens.log` (~/.local/state/uplens/uplens.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("uplens.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMode;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.ingest.move_processed);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.rollup.model_shares.len(), 4);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[ingest]
raw_dir = "/srv/exports"
move_processed = false

[logging]
level = "debug"

[[rollup.model_shares]]
model = "house-model"
share = 1.0

[[rollup.mode_shares]]
mode = "inline"
share = 0.7

[[rollup.mode_shares]]
mode = "ask"
share = 0.3
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.raw_data_dir(), PathBuf::from("/srv/exports"));
        assert!(!config.ingest.move_processed);
        assert_eq!(config.logging.level, "debug");

        let policy = config.rollup.fallback_policy().unwrap();
        assert_eq!(policy.model_shares.len(), 1);
        assert!((policy.model_shares[0].1 - 1.0).abs() < 1e-9);
        assert_eq!(policy.mode_shares[0].0, ChatMode::Inline);
    }

    #[test]
    fn test_unknown_mode_is_config_error() {
        let config = RollupConfig {
            model_shares: default_model_shares(),
            mode_shares: vec![ModeShare {
                mode: "voice".to_string(),
                share: 1.0,
            }],
        };
        assert!(config.fallback_policy().is_err());
    }

    #[test]
    fn test_default_policy_shares_normalized() {
        let policy = RollupConfig::default().fallback_policy().unwrap();
        let model_sum: f64 = policy.model_shares.iter().map(|(_, s)| s).sum();
        let mode_sum: f64 = policy.mode_shares.iter().map(|(_, s)| s).sum();
        assert!((model_sum - 1.0).abs() < 1e-9);
        assert!((mode_sum - 1.0).abs() < 1e-9);
    }
}
