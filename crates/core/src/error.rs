//! Job error model.

use thiserror::Error;

/// Result type returned by step implementations.
pub type StepResult<T = ()> = Result<T, StepError>;

/// Failure reported by a step while processing a single job.
///
/// The variant decides what the retry policy does with it: `Fatal` is never
/// retried, `Retryable` and `Unexpected` are retried until attempts run out.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StepError {
    /// Permanent failure (validation, missing input, unrecoverable result).
    #[error("fatal: {0}")]
    Fatal(String),

    /// Expected transient failure (network, quota, service unavailable).
    #[error("retryable: {0}")]
    Retryable(String),

    /// Anything the step did not classify itself.
    #[error("unexpected: {0}")]
    Unexpected(String),
}

impl StepError {
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::Unexpected(msg.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, StepError::Fatal(_))
    }

    /// Short label used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StepError::Fatal(_) => "fatal",
            StepError::Retryable(_) => "retryable",
            StepError::Unexpected(_) => "unexpected",
        }
    }
}

impl From<anyhow::Error> for StepError {
    fn from(err: anyhow::Error) -> Self {
        // `{:#}` keeps the context chain on one line.
        Self::Unexpected(format!("{err:#}"))
    }
}

/// Terminal failure of a job, as seen by the runner.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The step reported a fatal error; no retry was attempted after it.
    #[error("job failed fatally: {0}")]
    Fatal(String),

    /// Every attempt failed with a retryable (or unclassified) error.
    #[error("retry attempts exhausted after {attempts} attempt(s): {last}")]
    RetryExhausted { attempts: u32, last: StepError },

    /// The job path broke outside of the step contract (e.g. a panic).
    #[error("job failed unexpectedly: {0}")]
    Unexpected(String),
}

impl JobError {
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Fatal(_) => "fatal",
            JobError::RetryExhausted { .. } => "retry_exhausted",
            JobError::Unexpected(_) => "unexpected",
        }
    }
}
