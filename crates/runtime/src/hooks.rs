//! Lifecycle callbacks around job execution.

use std::fmt;

use pipeline_core::{Job, JobError};

pub type JobHook = Box<dyn Fn(&Job) -> anyhow::Result<()> + Send + Sync>;
pub type ErrorHook = Box<dyn Fn(&Job, &JobError) -> anyhow::Result<()> + Send + Sync>;

/// Ordered callbacks fired by the runner.
///
/// - `before`: ahead of every attempt, after the attempt is stamped
/// - `after`: once an attempt's `process` call succeeded
/// - `error`: once per job that ended in a failure
///
/// Callbacks run on the worker executing the job, in registration order.
/// The first failing callback stops the chain and its error is returned.
#[derive(Default)]
pub struct HookRegistry {
    before: Vec<JobHook>,
    after: Vec<JobHook>,
    error: Vec<ErrorHook>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_before<F>(&mut self, hook: F)
    where
        F: Fn(&Job) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.before.push(Box::new(hook));
    }

    pub fn register_after<F>(&mut self, hook: F)
    where
        F: Fn(&Job) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.after.push(Box::new(hook));
    }

    pub fn register_error<F>(&mut self, hook: F)
    where
        F: Fn(&Job, &JobError) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.error.push(Box::new(hook));
    }

    pub fn with_before<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Job) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register_before(hook);
        self
    }

    pub fn with_after<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Job) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register_after(hook);
        self
    }

    pub fn with_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Job, &JobError) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register_error(hook);
        self
    }

    pub fn run_before(&self, job: &Job) -> anyhow::Result<()> {
        self.before.iter().try_for_each(|hook| hook(job))
    }

    pub fn run_after(&self, job: &Job) -> anyhow::Result<()> {
        self.after.iter().try_for_each(|hook| hook(job))
    }

    pub fn run_error(&self, job: &Job, err: &JobError) -> anyhow::Result<()> {
        self.error.iter().try_for_each(|hook| hook(job, err))
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty() && self.error.is_empty()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .field("error", &self.error.len())
            .finish()
    }
}
