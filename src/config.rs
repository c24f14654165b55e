//! Engine configuration
//!
//! TOML file support, optional environment variable overrides and defaults
//! that match upstream query engine behaviour. Evaluation itself never reads
//! the environment; hosts call [`EngineConfig::apply_env_overrides`] once at
//! startup if they want that.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct EngineConfig {
    /// Function evaluation settings
    #[serde(default)]
    pub functions: FunctionsConfig,

    /// Monitoring and observability
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Function evaluation settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FunctionsConfig {
    /// Keep `__name__` on results and only mark it for removal
    #[serde(default)]
    pub enable_delayed_name_removal: bool,

    /// Register functions that are still experimental upstream
    #[serde(default = "default_true")]
    pub enable_experimental_functions: bool,

    /// Compiled regexes kept per evaluation context
    #[serde(default = "default_regex_cache_capacity")]
    pub regex_cache_capacity: usize,

    /// Gap to the range boundary, in average sample intervals, beyond which
    /// rate extrapolation stops at half an interval
    #[serde(default = "default_extrapolation_threshold_factor")]
    pub extrapolation_threshold_factor: f64,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MonitoringConfig {
    /// Count function calls and annotations in the process registry
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_true() -> bool {
    true
}
fn default_regex_cache_capacity() -> usize {
    64
}
fn default_extrapolation_threshold_factor() -> f64 {
    1.1
}

impl Default for FunctionsConfig {
    fn default() -> Self {
        Self {
            enable_delayed_name_removal: false,
            enable_experimental_functions: default_true(),
            regex_cache_capacity: default_regex_cache_capacity(),
            extrapolation_threshold_factor: default_extrapolation_threshold_factor(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: default_true(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file and apply environment overrides on top
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override settings from `KUBA_PROMQL_*` environment variables
    ///
    /// Unparsable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("KUBA_PROMQL_DELAYED_NAME_REMOVAL") {
            self.functions.enable_delayed_name_removal = v;
        }
        if let Some(v) = env_parse("KUBA_PROMQL_EXPERIMENTAL_FUNCTIONS") {
            self.functions.enable_experimental_functions = v;
        }
        if let Some(v) = env_parse("KUBA_PROMQL_REGEX_CACHE_CAPACITY") {
            self.functions.regex_cache_capacity = v;
        }
        if let Some(v) = env_parse("KUBA_PROMQL_METRICS_ENABLED") {
            self.monitoring.metrics_enabled = v;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.functions.regex_cache_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "functions.regex_cache_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        let factor = self.functions.extrapolation_threshold_factor;
        if !factor.is_finite() || factor < 1.0 {
            return Err(ConfigError::Invalid {
                field: "functions.extrapolation_threshold_factor",
                reason: format!("must be a finite value >= 1, got {}", factor),
            });
        }
        Ok(())
    }

    /// Builder style toggle for delayed name removal
    pub fn with_delayed_name_removal(mut self, enabled: bool) -> Self {
        self.functions.enable_delayed_name_removal = enabled;
        self
    }

    /// Builder style toggle for experimental functions
    pub fn with_experimental_functions(mut self, enabled: bool) -> Self {
        self.functions.enable_experimental_functions = enabled;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
