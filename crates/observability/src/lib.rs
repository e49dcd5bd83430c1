//! Tracing/logging setup shared by every binary of the workspace.

/// Tracing subscriber configuration (filters, layers, log file).
pub mod tracing;

pub use crate::tracing::{ObservabilityError, init, init_default};
