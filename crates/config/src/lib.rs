//! Runtime configuration: YAML file → typed, validated settings.
//!
//! - [`model`] holds the settings structs and their defaults.
//! - [`loader`] reads a file or string and runs validation.
//! - [`validate`] checks the semantic constraints serde cannot express.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_config, parse_config};
pub use model::{Config, LoggingSettings, RateLimit, RetrySettings};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(std::path::PathBuf),

    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
