//! Pipeline configuration
//!
//! One immutable [`PipelineConfig`] value is built at process start and
//! passed to every stage. Sources, later wins: defaults, an optional TOML
//! file, `HEALTHCAST_<FIELD>` environment variables, then CLI flags.

use crate::device::ComputeDevice;
use crate::errors::{PipelineError, Result};
use healthcast_forest::{ForestConfig, MaxFeatures};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "HEALTHCAST_";

/// Feature scoring strategy used before training
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RankerKind {
    #[default]
    Forest,
    Correlation,
}

impl FromStr for RankerKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forest" => Ok(RankerKind::Forest),
            "correlation" => Ok(RankerKind::Correlation),
            other => Err(PipelineError::config(format!(
                "unknown ranker `{}` (expected forest or correlation)",
                other
            ))),
        }
    }
}

/// Full pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Seed for every random stream
    pub seed: u64,
    /// Fraction of training rows held out for validation
    pub valid_ratio: f64,
    /// Hard cap on epochs
    pub n_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub momentum: f64,
    /// Patience: consecutive non-improving epochs before halting
    pub early_stop: usize,
    pub top_k_features: usize,
    /// Keep every column and skip ranking
    pub select_all: bool,
    pub ensemble_size: usize,
    pub ensemble_max_depth: usize,
    pub ranker: RankerKind,
    /// Header of the prediction column
    pub target_name: String,
    pub device: ComputeDevice,
    pub pin_memory: bool,
    pub save_path: PathBuf,
    /// Directory for JSON-lines scalar events
    pub events_dir: Option<PathBuf>,
    pub log_level: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed: 5201314,
            valid_ratio: 0.2,
            n_epochs: 5000,
            batch_size: 256,
            learning_rate: 1e-5,
            momentum: 0.7,
            early_stop: 600,
            top_k_features: 20,
            select_all: false,
            ensemble_size: 100,
            ensemble_max_depth: 5,
            ranker: RankerKind::Forest,
            target_name: "tested_positive".to_string(),
            device: ComputeDevice::Cpu,
            pin_memory: true,
            save_path: PathBuf::from("./models/model.ckpt"),
            events_dir: None,
            log_level: "info".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| PipelineError::config(format!("invalid configuration: {}", e)))
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content =
            std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Self::from_toml_str(&content)
    }

    /// Apply `HEALTHCAST_<FIELD>` variables from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(std::env::vars())
    }

    /// Apply `(name, value)` pairs; names without the prefix are ignored
    pub fn apply_overrides<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(field) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            debug!(field, value = value.as_str(), "configuration override");
            self.set(&field.to_ascii_lowercase(), &value)?;
        }
        Ok(())
    }

    /// Set a single field from its textual form
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "seed" => self.seed = parse_value(key, value)?,
            "valid_ratio" => self.valid_ratio = parse_value(key, value)?,
            "n_epochs" => self.n_epochs = parse_value(key, value)?,
            "batch_size" => self.batch_size = parse_value(key, value)?,
            "learning_rate" => self.learning_rate = parse_value(key, value)?,
            "momentum" => self.momentum = parse_value(key, value)?,
            "early_stop" => self.early_stop = parse_value(key, value)?,
            "top_k_features" => self.top_k_features = parse_value(key, value)?,
            "select_all" => self.select_all = parse_value(key, value)?,
            "ensemble_size" => self.ensemble_size = parse_value(key, value)?,
            "ensemble_max_depth" => self.ensemble_max_depth = parse_value(key, value)?,
            "ranker" => self.ranker = value.parse()?,
            "target_name" => self.target_name = value.to_string(),
            "device" => self.device = value.parse()?,
            "pin_memory" => self.pin_memory = parse_value(key, value)?,
            "save_path" => self.save_path = PathBuf::from(value),
            "events_dir" => {
                self.events_dir = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                }
            }
            "log_level" => self.log_level = value.to_string(),
            other => {
                return Err(PipelineError::config(format!(
                    "unknown configuration key `{}`",
                    other
                )))
            }
        }
        Ok(())
    }

    /// Reject every out-of-range option before any stage runs
    pub fn validate(&self) -> Result<()> {
        if !self.valid_ratio.is_finite() || !(0.0..1.0).contains(&self.valid_ratio) {
            return Err(PipelineError::config(format!(
                "valid_ratio must be in [0, 1), got {}",
                self.valid_ratio
            )));
        }
        if self.n_epochs == 0 {
            return Err(PipelineError::config("n_epochs must be positive"));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::config("batch_size must be positive"));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(PipelineError::config(format!(
                "learning_rate must be a positive number, got {}",
                self.learning_rate
            )));
        }
        if !self.momentum.is_finite() || !(0.0..1.0).contains(&self.momentum) {
            return Err(PipelineError::config(format!(
                "momentum must be in [0, 1), got {}",
                self.momentum
            )));
        }
        if self.early_stop == 0 {
            return Err(PipelineError::config("early_stop must be positive"));
        }
        if self.top_k_features == 0 {
            return Err(PipelineError::config("top_k_features must be positive"));
        }
        if self.ensemble_size == 0 {
            return Err(PipelineError::config("ensemble_size must be positive"));
        }
        if self.ensemble_max_depth == 0 {
            return Err(PipelineError::config("ensemble_max_depth must be positive"));
        }
        if self.target_name.trim().is_empty() || self.target_name.contains(',') {
            return Err(PipelineError::config(format!(
                "target_name must be a non-empty CSV field, got `{}`",
                self.target_name
            )));
        }
        if self.save_path.as_os_str().is_empty() {
            return Err(PipelineError::config("save_path must not be empty"));
        }
        Ok(())
    }

    /// Random-forest settings for the feature ranker
    pub fn forest_config(&self) -> ForestConfig {
        ForestConfig {
            n_estimators: self.ensemble_size,
            max_depth: Some(self.ensemble_max_depth),
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
            bootstrap: true,
            seed: self.seed,
        }
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| {
        PipelineError::config(format!("invalid value `{}` for {}: {}", value, key, e))
    })
}
