// ⚙️ Application configuration
//
// Defaults, then `spend.toml` (or the file named by SPEND_CONFIG) if it
// exists, then SPEND_* environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ml::{TrainingOptions, DEFAULT_CONFIDENCE_THRESHOLD};

pub const CONFIG_ENV: &str = "SPEND_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "spend.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub model_dir: PathBuf,
    pub bind_addr: String,

    /// Minimum model probability for a prediction to be used
    pub confidence_threshold: f64,

    pub training: TrainingOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_path: PathBuf::from("data/app.db"),
            model_dir: PathBuf::from("models"),
            bind_addr: "0.0.0.0:5000".to_string(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            training: TrainingOptions::default(),
        }
    }
}

impl AppConfig {
    /// Parse a TOML file; a missing file yields the defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(AppConfig::default());
        }
        let s = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        toml::from_str(&s).with_context(|| format!("parse {}", path.display()))
    }

    /// Apply SPEND_* overrides from `lookup` (normally `std::env::var`)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SPEND_DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("SPEND_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SPEND_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = lookup("SPEND_CONFIDENCE_THRESHOLD") {
            self.confidence_threshold = v
                .trim()
                .parse()
                .with_context(|| format!("SPEND_CONFIDENCE_THRESHOLD is not a number: {:?}", v))?;
        }
        if let Some(v) = lookup("SPEND_MIN_SAMPLES_PER_CATEGORY") {
            self.training.min_samples_per_category = v
                .trim()
                .parse()
                .with_context(|| format!("SPEND_MIN_SAMPLES_PER_CATEGORY is not an integer: {:?}", v))?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            anyhow::bail!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            );
        }
        if !(0.0..1.0).contains(&self.training.test_fraction) {
            anyhow::bail!(
                "training.test_fraction must be within [0, 1), got {}",
                self.training.test_fraction
            );
        }
        Ok(())
    }
}

/// Load configuration from the file and the process environment
pub fn load_config() -> Result<AppConfig> {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    let mut config = AppConfig::from_file(Path::new(&path))?;
    config.apply_overrides(|key| std::env::var(key).ok())?;
    Ok(config)
}
