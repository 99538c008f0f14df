//! Configuration Module
//!
//! TOML-based configuration. Every section is optional and falls back to
//! defaults; CLI flags override file settings.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::classifier::ATTACK_THRESHOLD;
use crate::error::ConfigError;
use crate::features::{FeatureLayout, DEFAULT_IDLE_THRESHOLD_US};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub scan: ScanConfig,
    pub model: ModelConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Loads configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Generates a default configuration file content
    pub fn generate_default() -> String {
        toml::to_string_pretty(&Config::default())
            .unwrap_or_else(|_| "# Failed to generate config".to_string())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.local_address.is_unspecified() {
            return Err(ConfigError::NoLocalAddress);
        }
        if !(0.0..=1.0).contains(&self.scan.attack_threshold) {
            return Err(ConfigError::Threshold(self.scan.attack_threshold));
        }
        if self.scan.interval_secs == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(())
    }

    /// Resolves the feature columns the model expects, in order.
    pub fn feature_layout(&self) -> Result<FeatureLayout> {
        let layout = match &self.model.feature_columns {
            Some(path) => FeatureLayout::load_json(path)?,
            None => FeatureLayout::default(),
        };
        Ok(layout.with_idle_threshold(self.scan.idle_threshold_us))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Address of the monitored interface; packets sent to it are forward.
    pub local_address: Ipv4Addr,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { local_address: Ipv4Addr::UNSPECIFIED }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ScanConfig {
    pub interval_secs: u64,
    /// Probability at or above which a flow raises an alert.
    pub attack_threshold: f64,
    /// Inter-arrival gap (µs) counted as idle time.
    pub idle_threshold_us: u64,
}

impl ScanConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_secs: 45,
            attack_threshold: ATTACK_THRESHOLD,
            idle_threshold_us: DEFAULT_IDLE_THRESHOLD_US,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// ONNX model file.
    pub path: Option<PathBuf>,
    /// JSON file with the model's ordered feature columns. Built-in order if unset.
    pub feature_columns: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. "info" or "flowscan=debug".
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}
