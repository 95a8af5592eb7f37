//! Configuration types for the ice-lab routines.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::loaders::Sensor;
use crate::processors::harp_model::ModelOptions;
use crate::processors::salinity::DerivationMethod;

/// Errors raised while turning configuration values into typed settings.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("no derivation method configured")]
    MissingMethod,

    #[error("unknown derivation method '{0}' (expected one of: assur, notz_worster, vancoppenolle, freezing_point)")]
    UnknownMethod(String),

    #[error("unknown harp channel '{0}'")]
    UnknownChannel(String),

    #[error("channel '{0}' is not a resistance channel (expected r2 or r16)")]
    NotAResistanceChannel(String),

    #[error("invalid harp layout: {0}")]
    InvalidLayout(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Layout of the salinity harp logger and the derivation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarpConfig {
    /// Number of harp modules wired to the logger
    #[serde(default = "default_module_count")]
    pub module_count: usize,

    /// Number of segments (wire pairs) on each module
    #[serde(default = "default_segments_per_module")]
    pub segments_per_module: usize,

    /// Brine salinity relation (assur, notz_worster, vancoppenolle, freezing_point)
    #[serde(default = "default_derivation_method")]
    pub derivation_method: String,

    /// Resistance channel used for conductivity (r2 or r16)
    #[serde(default = "default_resistance_channel")]
    pub resistance_channel: String,

    /// Cell constant converting resistance to conductivity [1/m]
    #[serde(default = "default_cell_constant")]
    pub cell_constant: f64,

    /// Pressure at the harp [dbar]
    #[serde(default)]
    pub pressure_dbar: f64,
}

fn default_module_count() -> usize {
    1
}

fn default_segments_per_module() -> usize {
    16
}

fn default_derivation_method() -> String {
    DerivationMethod::Vancoppenolle.name().to_string()
}

fn default_resistance_channel() -> String {
    Sensor::R16.name().to_string()
}

fn default_cell_constant() -> f64 {
    1.0
}

impl Default for HarpConfig {
    fn default() -> Self {
        Self {
            module_count: default_module_count(),
            segments_per_module: default_segments_per_module(),
            derivation_method: default_derivation_method(),
            resistance_channel: default_resistance_channel(),
            cell_constant: default_cell_constant(),
            pressure_dbar: 0.0,
        }
    }
}

impl HarpConfig {
    /// Resolve the configured derivation method.
    pub fn method(&self) -> Result<DerivationMethod, ConfigError> {
        self.derivation_method.parse()
    }

    /// Check that the declared logger layout is usable.
    pub fn validate_layout(&self) -> Result<(), ConfigError> {
        if self.module_count == 0 {
            return Err(ConfigError::InvalidLayout(
                "module_count must be positive".to_string(),
            ));
        }
        if self.segments_per_module == 0 {
            return Err(ConfigError::InvalidLayout(
                "segments_per_module must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the per-call model options from this configuration.
    pub fn model_options(&self) -> Result<ModelOptions, ConfigError> {
        let channel: Sensor = self.resistance_channel.parse()?;
        if !channel.is_resistance() {
            return Err(ConfigError::NotAResistanceChannel(
                self.resistance_channel.clone(),
            ));
        }
        if !(self.cell_constant.is_finite() && self.cell_constant > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "cell_constant",
                reason: format!("{} is not a positive number", self.cell_constant),
            });
        }
        if !(self.pressure_dbar.is_finite() && self.pressure_dbar >= 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "pressure_dbar",
                reason: format!("{} is not a non-negative number", self.pressure_dbar),
            });
        }

        Ok(ModelOptions {
            resistance_channel: channel,
            cell_constant: self.cell_constant,
            pressure_dbar: self.pressure_dbar,
        })
    }
}

/// Settings for the Arduino multi-sensor logger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArduinoConfig {
    /// Column separator of the CSV log
    #[serde(default = "default_separator")]
    pub separator: char,

    /// Width of the resampling bins in seconds (0 disables resampling)
    #[serde(default = "default_resample_secs")]
    pub resample_secs: u64,

    /// Fill interior gaps by linear interpolation in time
    #[serde(default)]
    pub interpolate: bool,
}

fn default_separator() -> char {
    ','
}

fn default_resample_secs() -> u64 {
    10
}

impl Default for ArduinoConfig {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            resample_secs: default_resample_secs(),
            interpolate: false,
        }
    }
}

/// Missing-value flags written by the CTD firmwares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CtdConfig {
    #[serde(default = "default_seabird_nan_flag")]
    pub seabird_nan_flag: f64,

    #[serde(default = "default_rbr_nan_flag")]
    pub rbr_nan_flag: f64,
}

fn default_seabird_nan_flag() -> f64 {
    -9.990e-29
}

fn default_rbr_nan_flag() -> f64 {
    -1000.0
}

impl Default for CtdConfig {
    fn default() -> Self {
        Self {
            seabird_nan_flag: default_seabird_nan_flag(),
            rbr_nan_flag: default_rbr_nan_flag(),
        }
    }
}

/// Main configuration combining all sub-configs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub harp: HarpConfig,

    #[serde(default)]
    pub arduino: ArduinoConfig,

    #[serde(default)]
    pub ctd: CtdConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
