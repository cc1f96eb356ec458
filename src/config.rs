use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::plugin::SettingValue;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("pipeline.plugin must not be empty")]
    EmptyPluginId,
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

fn default_camera() -> i32 {
    0
}

fn default_probe_limit() -> i32 {
    8
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_camera")]
    pub camera: i32,
    /// Takes precedence over `camera` when set.
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default = "default_probe_limit")]
    pub probe_limit: i32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            camera: default_camera(),
            file: None,
            probe_limit: default_probe_limit(),
        }
    }
}

fn default_metrics_window() -> usize {
    crate::pipeline::DEFAULT_WINDOW
}

fn default_channel_capacity() -> usize {
    2
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Absent means pass-through.
    #[serde(default)]
    pub plugin: Option<String>,
    #[serde(default)]
    pub settings: BTreeMap<String, SettingValue>,
    #[serde(default = "default_metrics_window")]
    pub metrics_window: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub max_frames: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            plugin: None,
            settings: BTreeMap::new(),
            metrics_window: default_metrics_window(),
            channel_capacity: default_channel_capacity(),
            max_frames: None,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("models")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetsConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Model file name to download URL.
    #[serde(default)]
    pub models: BTreeMap<String, String>,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            models: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportConfig {
    #[serde(default)]
    pub record: Option<PathBuf>,
    #[serde(default)]
    pub results_json: Option<PathBuf>,
    #[serde(default)]
    pub snapshot: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;

        if config.pipeline.plugin.as_deref() == Some("") {
            return Err(ConfigError::EmptyPluginId);
        }
        if config.pipeline.metrics_window == 0 {
            return Err(ConfigError::Zero("pipeline.metrics_window"));
        }
        if config.pipeline.channel_capacity == 0 {
            return Err(ConfigError::Zero("pipeline.channel_capacity"));
        }

        Ok(config)
    }
}
