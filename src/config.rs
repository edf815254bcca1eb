use std::path::{Path, PathBuf};

use log::debug;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::export::OutputFormat;

/// Config file picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "normalizer.toml";

/// Files processed when neither the command line nor the config names any.
pub const DEFAULT_INPUTS: &[&str] = &[
    "7pm_food_truck.csv",
    "21st_littlefield_fountain.csv",
    "22nd_street_construction.csv",
    "SZB_back_area.csv",
    "target_section.csv",
];

// ---------------------------------------------------------------------------
// Top-level run configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NormalizerConfig {
    /// Directory the `inputs` are resolved against.
    pub input_dir: PathBuf,
    pub inputs: Vec<String>,
    pub output_dir: PathBuf,
    pub format: OutputFormat,
    pub on_partial: PartialPolicy,
    /// Print this many combined readings after the run (0 = off).
    pub preview_rows: usize,
    pub device: DeviceConfig,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("."),
            inputs: DEFAULT_INPUTS.iter().map(|s| s.to_string()).collect(),
            output_dir: PathBuf::from("."),
            format: OutputFormat::default(),
            on_partial: PartialPolicy::default(),
            preview_rows: 0,
            device: DeviceConfig::default(),
        }
    }
}

impl NormalizerConfig {
    /// Load from `path`, or from [`DEFAULT_CONFIG_FILE`] if it exists,
    /// falling back to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    debug!("no {DEFAULT_CONFIG_FILE} found, using defaults");
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_toml(&content)?;
        debug!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Configured inputs joined onto `input_dir`.
    pub fn input_paths(&self) -> Vec<PathBuf> {
        self.inputs.iter().map(|f| self.input_dir.join(f)).collect()
    }
}

/// What to do with a wall-clock export that lacks its timestamp column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialPolicy {
    /// Warn, keep the file's metadata, contribute no readings.
    #[default]
    Skip,
    /// Abort the run.
    Fail,
}

// ---------------------------------------------------------------------------
// Device layout: the schema mapping from export columns to canonical fields
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    /// Size of the leading key/value block.
    pub metadata_lines: usize,
    /// File-name substrings identifying offset-clock exports.
    pub offset_markers: Vec<String>,
    /// Source column mapped to `Recorded.Value..dBA.`.
    pub decibel_column: String,
    /// Source column holding the offset (offset-clock) or timestamp (wall-clock).
    pub timestamp_column: String,
    /// Metadata key holding the session start for offset-clock exports.
    pub start_time_key: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            metadata_lines: 8,
            offset_markers: vec!["target_section".to_string()],
            decibel_column: "Recorded Value (dBA)".to_string(),
            timestamp_column: "Time Stamp (yyyy-MM-dd HH:mm:ss.SSS)".to_string(),
            start_time_key: "Start Time".to_string(),
        }
    }
}
