//! Configuration loading and resolution
//!
//! One TOML file per experiment. Every recognised option is a typed field
//! with a built-in default; unknown keys are rejected at load time so a typo
//! never silently falls back to a default.
//!
//! Config file resolution order:
//! 1. Command-line argument (highest priority)
//! 2. `SPHEROID_CONFIG` environment variable
//! 3. `<config dir>/spheroid/config.toml`
//! 4. Built-in defaults (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "SPHEROID_CONFIG";

/// Default capacity of the bounded lookup caches
pub const DEFAULT_CACHE_CAPACITY: usize = 384;

/// Value written by the segmentation tool when no neighboring spheroid was found
/// (2^16 - 2); ambiguity checks treat it as "unmeasured".
pub const UNMEASURED_DISTANCE: f64 = 65534.0;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Capacity of the bounded lookup caches
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub barcode: BarcodeConfig,

    #[serde(default)]
    pub distance: DistanceConfig,

    #[serde(default)]
    pub sphere: SphereConfig,

    #[serde(default)]
    pub ambiguity: AmbiguityConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Experiment-wide defaults used when a selector leaves a field open
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultsConfig {
    /// Object type analysed by debarcoding and quality filters ("cell", "sphere", ...)
    ///
    /// No built-in default: every experiment segments its own object types.
    #[serde(default)]
    pub object_type: Option<String>,

    /// Stack holding raw intensity channels
    #[serde(default = "default_stack")]
    pub stack: String,

    #[serde(default = "default_measurement_name")]
    pub measurement_name: String,

    #[serde(default = "default_measurement_type")]
    pub measurement_type: String,
}

/// Barcode channel set used by the debarcoder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BarcodeConfig {
    /// Stack of the barcode channels; falls back to `defaults.stack`
    #[serde(default)]
    pub stack: Option<String>,

    /// Ordered barcode channels; position i matches digit i of a condition barcode
    #[serde(default)]
    pub channels: Vec<String>,

    #[serde(default)]
    pub measurement_name: Option<String>,

    #[serde(default)]
    pub measurement_type: Option<String>,

    /// Intensity transform applied before thresholding
    #[serde(default)]
    pub transform: TransformConfig,
}

/// Intensity transform names accepted in the config file
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TransformConfig {
    #[default]
    Identity,
    Log1p,
    Arcsinh { cofactor: f64 },
}

/// Distance-transform channels
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DistanceConfig {
    #[serde(default = "default_distance_stack")]
    pub stack: String,

    /// Distance to the rim of the enclosing spheroid (debarcoding gate)
    #[serde(default = "default_rim_channel")]
    pub rim_channel: String,

    /// Distance to the nearest other spheroid (ambiguity filter)
    #[serde(default = "default_other_channel")]
    pub other_channel: String,

    #[serde(default = "default_distance_measurement_name")]
    pub measurement_name: String,

    #[serde(default = "default_measurement_type")]
    pub measurement_type: String,
}

/// Sphere-membership filter parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SphereConfig {
    /// Channel marking the spheroid (e.g. a membrane dye)
    #[serde(default)]
    pub channel: Option<String>,

    /// Channels the sphere channel must dominate
    #[serde(default)]
    pub other_channels: Vec<String>,

    #[serde(default = "default_minfrac")]
    pub minfrac: f64,

    /// Absolute floor on the scaled sphere-channel value; `minfrac` when unset
    #[serde(default)]
    pub floor: Option<f64>,

    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

/// Ambiguity filter parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AmbiguityConfig {
    #[serde(default = "default_ambiguity_floor")]
    pub floor: f64,

    #[serde(default = "default_ambiguity_ceiling")]
    pub ceiling: f64,
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("spheroid").join("spheroid.db"))
        .unwrap_or_else(|| PathBuf::from("./spheroid_data/spheroid.db"))
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stack() -> String {
    "FullStack".to_string()
}

fn default_measurement_name() -> String {
    "MeanIntensity".to_string()
}

fn default_measurement_type() -> String {
    "Intensity".to_string()
}

fn default_distance_stack() -> String {
    "DistStack".to_string()
}

fn default_rim_channel() -> String {
    "dist-rim".to_string()
}

fn default_other_channel() -> String {
    "dist-other".to_string()
}

fn default_distance_measurement_name() -> String {
    "MeanIntensity".to_string()
}

fn default_minfrac() -> f64 {
    0.5
}

fn default_epsilon() -> f64 {
    1e-4
}

fn default_ambiguity_floor() -> f64 {
    -5.0
}

fn default_ambiguity_ceiling() -> f64 {
    UNMEASURED_DISTANCE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            cache_capacity: default_cache_capacity(),
            logging: LoggingConfig::default(),
            defaults: DefaultsConfig::default(),
            barcode: BarcodeConfig::default(),
            distance: DistanceConfig::default(),
            sphere: SphereConfig::default(),
            ambiguity: AmbiguityConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            object_type: None,
            stack: default_stack(),
            measurement_name: default_measurement_name(),
            measurement_type: default_measurement_type(),
        }
    }
}

impl Default for BarcodeConfig {
    fn default() -> Self {
        Self {
            stack: None,
            channels: Vec::new(),
            measurement_name: None,
            measurement_type: None,
            transform: TransformConfig::Identity,
        }
    }
}

impl Default for DistanceConfig {
    fn default() -> Self {
        Self {
            stack: default_distance_stack(),
            rim_channel: default_rim_channel(),
            other_channel: default_other_channel(),
            measurement_name: default_distance_measurement_name(),
            measurement_type: default_measurement_type(),
        }
    }
}

impl Default for SphereConfig {
    fn default() -> Self {
        Self {
            channel: None,
            other_channels: Vec::new(),
            minfrac: default_minfrac(),
            floor: None,
            epsilon: default_epsilon(),
        }
    }
}

impl Default for AmbiguityConfig {
    fn default() -> Self {
        Self {
            floor: default_ambiguity_floor(),
            ceiling: default_ambiguity_ceiling(),
        }
    }
}

impl Config {
    /// Parse a config file and validate it
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config file (CLI → env → user config dir) and load it,
    /// falling back to built-in defaults when no file exists.
    ///
    /// A file that exists but fails to parse is an error, not a fallback.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_path) {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)
            }
            None => {
                warn!("No configuration file found, using built-in defaults");
                let config = Config::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Reject values no stage can run with
    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(Error::Config("cache_capacity must be at least 1".to_string()));
        }
        if !self.sphere.minfrac.is_finite() || self.sphere.minfrac < 0.0 {
            return Err(Error::Config(format!(
                "sphere.minfrac must be a finite non-negative number, got {}",
                self.sphere.minfrac
            )));
        }
        if !(self.sphere.epsilon.is_finite() && self.sphere.epsilon > 0.0) {
            return Err(Error::Config(format!(
                "sphere.epsilon must be positive, got {}",
                self.sphere.epsilon
            )));
        }
        if let Some(floor) = self.sphere.floor {
            if !floor.is_finite() {
                return Err(Error::Config("sphere.floor must be finite".to_string()));
            }
        }
        if !(self.ambiguity.floor.is_finite() && self.ambiguity.ceiling.is_finite()) {
            return Err(Error::Config("ambiguity bounds must be finite".to_string()));
        }
        if self.ambiguity.floor >= self.ambiguity.ceiling {
            return Err(Error::Config(format!(
                "ambiguity.floor ({}) must be below ambiguity.ceiling ({})",
                self.ambiguity.floor, self.ambiguity.ceiling
            )));
        }
        if let TransformConfig::Arcsinh { cofactor } = self.barcode.transform {
            if !(cofactor.is_finite() && cofactor > 0.0) {
                return Err(Error::Config(format!(
                    "barcode.transform cofactor must be positive, got {}",
                    cofactor
                )));
            }
        }
        Ok(())
    }

    /// Default object type, required by debarcoding and the quality filters
    pub fn object_type(&self) -> Result<&str> {
        self.defaults
            .object_type
            .as_deref()
            .ok_or_else(|| Error::Config("defaults.object_type is not set".to_string()))
    }

    /// Barcode channels, required by debarcoding
    pub fn barcode_channels(&self) -> Result<&[String]> {
        if self.barcode.channels.is_empty() {
            return Err(Error::Config("barcode.channels is empty".to_string()));
        }
        Ok(&self.barcode.channels)
    }

    /// Sphere-marker channel, required by the sphere filter
    pub fn sphere_channel(&self) -> Result<&str> {
        self.sphere
            .channel
            .as_deref()
            .ok_or_else(|| Error::Config("sphere.channel is not set".to_string()))
    }

    pub fn barcode_stack(&self) -> &str {
        self.barcode.stack.as_deref().unwrap_or(&self.defaults.stack)
    }

    pub fn barcode_measurement_name(&self) -> &str {
        self.barcode
            .measurement_name
            .as_deref()
            .unwrap_or(&self.defaults.measurement_name)
    }

    pub fn barcode_measurement_type(&self) -> &str {
        self.barcode
            .measurement_type
            .as_deref()
            .unwrap_or(&self.defaults.measurement_type)
    }
}

/// Find the config file to load, if any
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: user config directory
    dirs::config_dir()
        .map(|d| d.join("spheroid").join("config.toml"))
        .filter(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_capacity, 384);
        assert_eq!(config.sphere.epsilon, 1e-4);
        assert_eq!(config.ambiguity.floor, -5.0);
        assert_eq!(config.ambiguity.ceiling, 65534.0);
    }

    #[test]
    fn test_missing_object_type_is_config_error() {
        let config = Config::default();
        assert!(matches!(config.object_type(), Err(Error::Config(_))));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [defaults]
            object_type = "cell"

            [barcode]
            channels = ["Pd102", "Pd104", "Pd106"]
            transform = { kind = "arcsinh", cofactor = 5.0 }
            "#,
        )
        .unwrap();

        assert_eq!(config.object_type().unwrap(), "cell");
        assert_eq!(config.barcode_channels().unwrap().len(), 3);
        assert_eq!(config.barcode_stack(), "FullStack");
        assert_eq!(config.barcode_measurement_name(), "MeanIntensity");
        assert_eq!(config.barcode.transform, TransformConfig::Arcsinh { cofactor: 5.0 });
        assert_eq!(config.sphere.minfrac, 0.5);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result: std::result::Result<Config, _> = toml::from_str("cache_capcity = 10");
        assert!(result.is_err());
    }

    #[test]
    fn test_inverted_ambiguity_bounds_rejected() {
        let mut config = Config::default();
        config.ambiguity.floor = 70000.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
