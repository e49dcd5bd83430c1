use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Top-level configuration as read from `config.yaml`.
///
/// ```yaml
/// threads: 4
/// step_threads:
///   generate_audio: 10
/// retry:
///   attempts: 3
///   delays_sec: [5, 10]
/// rate_limits:
///   llm: { calls_per_minute: 60, burst: 5 }
/// logging:
///   level: info
///   file: ./logs/last_run.log
/// steps:
///   localize_categories: true
///   generate_audio: false
/// ```
///
/// Keys the runtime does not know about are kept in `extra` so that steps can
/// read their own settings from the same file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Default worker pool size for every step.
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Per-step pool size overrides, keyed by step name.
    #[serde(default)]
    pub step_threads: BTreeMap<String, usize>,

    #[serde(default)]
    pub retry: RetrySettings,

    /// Named token buckets available to steps.
    #[serde(default)]
    pub rate_limits: BTreeMap<String, RateLimit>,

    #[serde(default)]
    pub logging: LoggingSettings,

    /// Step enable flags in pipeline order. Steps not listed are enabled.
    #[serde(default)]
    pub steps: IndexMap<String, bool>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

fn default_threads() -> usize {
    4
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            step_threads: BTreeMap::new(),
            retry: RetrySettings::default(),
            rate_limits: BTreeMap::new(),
            logging: LoggingSettings::default(),
            steps: IndexMap::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Whether the step is enabled; unlisted steps run.
    pub fn step_enabled(&self, step: &str) -> bool {
        self.steps.get(step).copied().unwrap_or(true)
    }

    /// Pool size for the given step.
    pub fn threads_for(&self, step: &str) -> usize {
        self.step_threads.get(step).copied().unwrap_or(self.threads)
    }

    /// Override the default pool size (e.g. from `--threads`).
    ///
    /// Per-step overrides keep precedence.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Step-specific setting not interpreted by the runtime.
    pub fn extra(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.extra.get(key)
    }
}

/// Retry behaviour applied to every job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total number of attempts, including the first one.
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Delay before each retry; the last entry repeats.
    #[serde(default = "default_delays_sec")]
    pub delays_sec: Vec<f64>,
}

fn default_attempts() -> u32 {
    3
}

fn default_delays_sec() -> Vec<f64> {
    vec![5.0, 10.0]
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delays_sec: default_delays_sec(),
        }
    }
}

impl RetrySettings {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays_sec
            .iter()
            .map(|secs| Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or_default())
            .collect()
    }
}

/// A token bucket definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub calls_per_minute: u32,

    /// Bucket capacity (calls that may go out back to back).
    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_burst() -> u32 {
    1
}

impl RateLimit {
    pub fn new(calls_per_minute: u32, burst: u32) -> Self {
        Self {
            calls_per_minute,
            burst,
        }
    }

    /// Refill speed in tokens per second.
    pub fn refill_per_sec(&self) -> f64 {
        f64::from(self.calls_per_minute) / 60.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `error`, `warn`, `info`, `debug` or `trace`. `RUST_LOG` wins when set.
    #[serde(default = "default_level")]
    pub level: String,

    /// JSON log file; `null` disables file output.
    #[serde(default = "default_log_file")]
    pub file: Option<PathBuf>,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_log_file() -> Option<PathBuf> {
    Some(PathBuf::from("./logs/last_run.log"))
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: default_log_file(),
        }
    }
}
