//! Engine Configuration
//!
//! Defines the structure of the engine config file (`blockforge.toml`).
//! Every field has a default so a partial or empty file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors raised while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub limits: EngineLimits,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

/// Safety budgets for script execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineLimits {
    #[serde(default = "default_max_recursion_depth")]
    pub max_recursion_depth: usize,
    #[serde(default = "default_max_loops_per_actor")]
    pub max_loops_per_actor: usize,
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: u32,
    #[serde(default = "default_max_loop_duration_secs")]
    pub max_loop_duration_secs: u64,
    #[serde(default = "default_min_loop_delay_ticks")]
    pub min_loop_delay_ticks: u64,
    #[serde(default = "default_max_loop_delay_ticks")]
    pub max_loop_delay_ticks: u64,
}

impl EngineLimits {
    pub fn max_loop_duration(&self) -> Duration {
        Duration::from_secs(self.max_loop_duration_secs)
    }
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_recursion_depth: default_max_recursion_depth(),
            max_loops_per_actor: default_max_loops_per_actor(),
            max_loop_iterations: default_max_loop_iterations(),
            max_loop_duration_secs: default_max_loop_duration_secs(),
            min_loop_delay_ticks: default_min_loop_delay_ticks(),
            max_loop_delay_ticks: default_max_loop_delay_ticks(),
        }
    }
}

fn default_max_recursion_depth() -> usize {
    50
}

fn default_max_loops_per_actor() -> usize {
    10
}

fn default_max_loop_iterations() -> u32 {
    1000
}

fn default_max_loop_duration_secs() -> u64 {
    600
}

fn default_min_loop_delay_ticks() -> u64 {
    1
}

fn default_max_loop_delay_ticks() -> u64 {
    1200
}

/// Tick driver settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Ticks between persistent-variable flushes (0 disables autosave)
    #[serde(default = "default_autosave_interval_ticks")]
    pub autosave_interval_ticks: u64,
}

impl RuntimeConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            autosave_interval_ticks: default_autosave_interval_ticks(),
        }
    }
}

fn default_tick_interval_ms() -> u64 {
    50
}

fn default_autosave_interval_ticks() -> u64 {
    6000
}

/// Where graphs and persistent variables live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.limits.max_recursion_depth, 50);
        assert_eq!(config.limits.max_loops_per_actor, 10);
        assert_eq!(config.limits.max_loop_iterations, 1000);
        assert_eq!(config.limits.max_loop_duration(), Duration::from_secs(600));
    }

    #[test]
    fn test_partial_override() {
        let config = EngineConfig::from_toml_str(
            r#"
            [limits]
            max_loops_per_actor = 3

            [storage]
            data_dir = "/tmp/scripts"
            "#,
        )
        .unwrap();

        assert_eq!(config.limits.max_loops_per_actor, 3);
        assert_eq!(config.limits.max_loop_delay_ticks, 1200);
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/scripts"));
        assert_eq!(config.runtime.tick_interval_ms, 50);
    }

    #[test]
    fn test_invalid_toml() {
        let err = EngineConfig::from_toml_str("[limits\nmax = ").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = EngineConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
