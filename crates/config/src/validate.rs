use crate::model::Config;
use crate::{ConfigError, Result};

const LOG_LEVELS: &[&str] = &["error", "warn", "warning", "info", "debug", "trace"];

impl Config {
    /// Check constraints that deserialization alone does not enforce.
    pub fn validate(&self) -> Result<()> {
        validate_threads(self)?;
        validate_retry(self)?;
        validate_rate_limits(self)?;
        validate_logging(self)?;
        Ok(())
    }
}

fn invalid(msg: String) -> ConfigError {
    ConfigError::Invalid(msg)
}

fn validate_threads(cfg: &Config) -> Result<()> {
    if cfg.threads == 0 {
        return Err(invalid("threads must be >= 1 (got 0)".to_string()));
    }
    for (step, threads) in &cfg.step_threads {
        if *threads == 0 {
            return Err(invalid(format!("step_threads.{step} must be >= 1 (got 0)")));
        }
    }
    Ok(())
}

fn validate_retry(cfg: &Config) -> Result<()> {
    if cfg.retry.attempts == 0 {
        return Err(invalid("retry.attempts must be >= 1 (got 0)".to_string()));
    }
    for (idx, delay) in cfg.retry.delays_sec.iter().enumerate() {
        if !delay.is_finite() || *delay < 0.0 {
            return Err(invalid(format!(
                "retry.delays_sec[{idx}] must be a non-negative number (got {delay})"
            )));
        }
    }
    Ok(())
}

fn validate_rate_limits(cfg: &Config) -> Result<()> {
    for (name, limit) in &cfg.rate_limits {
        if limit.calls_per_minute == 0 {
            return Err(invalid(format!(
                "rate_limits.{name}.calls_per_minute must be >= 1 (got 0)"
            )));
        }
        if limit.burst == 0 {
            return Err(invalid(format!(
                "rate_limits.{name}.burst must be >= 1 (got 0)"
            )));
        }
    }
    Ok(())
}

fn validate_logging(cfg: &Config) -> Result<()> {
    let level = cfg.logging.level.trim().to_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        return Err(invalid(format!(
            "logging.level must be one of error|warn|info|debug|trace (got {:?})",
            cfg.logging.level
        )));
    }
    Ok(())
}
