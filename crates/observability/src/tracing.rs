//! Tracing/logging initialization.
//!
//! Two outputs:
//! - human-readable lines on stderr (span fields carry step, job and attempt)
//! - optional JSON lines in a log file, truncated at the start of every run

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pipeline_config::LoggingSettings;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("invalid log level {level:?}: {source}")]
    Filter {
        level: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("failed to prepare log file {}: {source}", .path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Initialize tracing/logging for the process.
///
/// `RUST_LOG` takes precedence over `settings.level`. Safe to call multiple
/// times (subsequent calls are no-ops and leave the log file alone).
pub fn init(settings: &LoggingSettings) -> Result<(), ObservabilityError> {
    if ::tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level_directive(&settings.level)).map_err(|source| {
            ObservabilityError::Filter {
                level: settings.level.clone(),
                source,
            }
        })?,
    };

    let file_layer = match settings.file.as_deref() {
        Some(path) => {
            let file = open_log_file(path)?;
            Some(
                fmt::layer()
                    .json()
                    .with_timer(fmt::time::SystemTime)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_thread_names(true)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    let console_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_names(true);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    Ok(())
}

/// Console-only logging at `info`, for tests and embedders without a config.
pub fn init_default() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn level_directive(level: &str) -> String {
    match level.trim().to_lowercase().as_str() {
        "warning" => "warn".to_string(),
        other => other.to_string(),
    }
}

/// Create the log file's directory, drop every file whose name starts with the
/// log file's name (e.g. `last_run.log`, `last_run.log.old`) and open a fresh
/// file. Nothing here rotates logs; each run keeps only its own file.
fn open_log_file(path: &Path) -> Result<File, ObservabilityError> {
    let to_err = |source| ObservabilityError::LogFile {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(to_err)?;
    }
    purge_previous_logs(path);

    File::create(path).map_err(to_err)
}

fn purge_previous_logs(path: &Path) {
    let Some(prefix) = path.file_name().and_then(|n| n.to_str()) else {
        return;
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let is_previous_log = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(prefix));
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if is_previous_log && is_file {
            let _ = fs::remove_file(entry.path());
        }
    }
}
