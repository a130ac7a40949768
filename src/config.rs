//! Engine configuration.
//!
//! Loaded with precedence: Env vars > Config file > Defaults
//!
//! # Example config file (idlink.toml)
//! ```toml
//! [engine]
//! max_retries = 5
//! ```
//!
//! Environment overrides use the `IDLINK_` prefix with `__` as the section
//! separator, e.g. `IDLINK_ENGINE__MAX_RETRIES=5`.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tuning knobs for the identify pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineTuning {
    /// How many times a request re-runs the full match/merge/write sequence
    /// after a conflicting concurrent commit before the error surfaces.
    pub max_retries: u32,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

impl EngineTuning {
    /// Tuning for heavily contended stores: more retry headroom.
    pub fn contended() -> Self {
        Self { max_retries: 8 }
    }
}

/// Top-level configuration for the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub engine: EngineTuning,
}

/// Configuration loading failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Extract(#[from] figment::Error),
}

impl EngineConfig {
    /// Load configuration with precedence: Env > File > Defaults
    ///
    /// # Arguments
    /// * `config_path` - Optional path to a TOML config file
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(EngineConfig::default()));
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("IDLINK_").split("__"));
        Ok(figment.extract()?)
    }
}
