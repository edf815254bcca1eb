use std::path::PathBuf;

use thiserror::Error;

/// Fatal conditions raised while normalizing a single export file.
///
/// Row-local problems (an unparseable offset or timestamp) never surface
/// here; they become null `Date`/`Time` cells instead.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed table section: {0}")]
    Csv(#[from] csv::Error),

    #[error("no table found after the {lines}-line metadata block")]
    EmptyTable { lines: usize },

    #[error("required metadata field '{key}' is missing")]
    MissingStartTime { key: String },

    #[error("metadata field '{key}' = '{value}' is not a YYYY-MM-DD HH:MM:SS.ffffff timestamp")]
    InvalidStartTime { key: String, value: String },

    #[error("expected column '{column}' not found")]
    MissingColumn { column: String },
}

/// Errors raised while loading the TOML configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}
