use std::fs;
use std::path::Path;

use crate::model::Config;
use crate::{ConfigError, Result};

/// Parse and validate a YAML document.
///
/// An empty document yields the default configuration.
pub fn parse_config(yaml: &str) -> Result<Config> {
    let config: Config = if yaml.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(yaml)?
    };
    config.validate()?;
    Ok(config)
}

/// Read, parse and validate the configuration file at `path`.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    parse_config(&contents)
}
