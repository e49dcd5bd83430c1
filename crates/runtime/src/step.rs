//! The business-logic seam: what jobs exist and what one job does.

use pipeline_core::{CorrelationId, Job, Payload, StepError, StepResult, make_job};
use tracing::info;

use crate::rate_limit::RateLimiter;

/// What a step sees while processing one attempt of a job.
#[derive(Debug, Clone, Copy)]
pub struct JobContext<'a> {
    limiter: &'a RateLimiter,
    attempt: u32,
    correlation_id: CorrelationId,
}

impl<'a> JobContext<'a> {
    pub fn new(limiter: &'a RateLimiter, attempt: u32, correlation_id: CorrelationId) -> Self {
        Self {
            limiter,
            attempt,
            correlation_id,
        }
    }

    pub fn limiter(&self) -> &'a RateLimiter {
        self.limiter
    }

    /// Block until a call to `resource` is allowed.
    pub fn acquire(&self, resource: &str) {
        self.limiter.acquire(resource);
    }

    pub fn acquire_weighted(&self, resource: &str, weight: f64) {
        self.limiter.acquire_weighted(resource, weight);
    }

    /// 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }
}

/// A pipeline step.
///
/// `process` is called concurrently from several workers and must not rely
/// on ordering between jobs. Errors are classified by the step: return
/// `StepError::Fatal` for anything a retry cannot fix.
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// Produce the jobs of this step. Called once per run, before execution.
    fn load_jobs(&self) -> Result<Vec<Job>, StepError>;

    fn process(&self, job: &Job, ctx: &JobContext<'_>) -> StepResult;
}

impl<S: Step + ?Sized> Step for &S {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn load_jobs(&self) -> Result<Vec<Job>, StepError> {
        (**self).load_jobs()
    }

    fn process(&self, job: &Job, ctx: &JobContext<'_>) -> StepResult {
        (**self).process(job, ctx)
    }
}

impl<S: Step + ?Sized> Step for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn load_jobs(&self) -> Result<Vec<Job>, StepError> {
        (**self).load_jobs()
    }

    fn process(&self, job: &Job, ctx: &JobContext<'_>) -> StepResult {
        (**self).process(job, ctx)
    }
}

/// Placeholder step: one job that only logs.
#[derive(Debug, Clone)]
pub struct NoOpStep {
    name: String,
}

impl NoOpStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Step for NoOpStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_jobs(&self) -> Result<Vec<Job>, StepError> {
        let mut payload = Payload::new();
        payload.insert("placeholder".to_string(), self.name.clone().into());
        Ok(vec![make_job(self.name.clone(), payload, &["placeholder"])])
    }

    fn process(&self, job: &Job, ctx: &JobContext<'_>) -> StepResult {
        info!(
            job_id = %job.id(),
            attempt = ctx.attempt(),
            "no-op step; nothing to do"
        );
        Ok(())
    }
}
