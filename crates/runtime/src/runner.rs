//! Drives the jobs of one step over a bounded pool of worker threads.
//!
//! The driver thread feeds every job into one channel, starts the workers and
//! then collects one [`JobReport`] per job from a result channel. Workers pull
//! jobs until the channel is drained; each job goes through the retry policy,
//! the hooks and the step, and ends in exactly one progress bucket.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Instant;

use pipeline_config::Config;
use pipeline_core::{CorrelationId, Job, JobError, JobId, StepError, StepResult};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};

use crate::hooks::HookRegistry;
use crate::progress::{Progress, ProgressSnapshot};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::shutdown::ShutdownFlag;
use crate::step::{JobContext, Step};

/// Pool size and retry behaviour of one runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSettings {
    pub threads: usize,
    pub retry: RetryPolicy,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            threads: 4,
            retry: RetryPolicy::default(),
        }
    }
}

impl RunnerSettings {
    pub fn new(threads: usize, retry: RetryPolicy) -> Self {
        Self { threads, retry }
    }

    /// Settings for `step`, honouring its pool size override.
    pub fn from_config(config: &Config, step: &str) -> Self {
        Self {
            threads: config.threads_for(step),
            retry: RetryPolicy::from_settings(&config.retry),
        }
    }
}

/// Terminal state of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    FailedFatal,
    FailedExhausted,
    FailedUnexpected,
    SkippedShutdown,
}

impl JobOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            JobOutcome::FailedFatal | JobOutcome::FailedExhausted | JobOutcome::FailedUnexpected
        )
    }
}

impl From<&JobError> for JobOutcome {
    fn from(err: &JobError) -> Self {
        match err {
            JobError::Fatal(_) => JobOutcome::FailedFatal,
            JobError::RetryExhausted { .. } => JobOutcome::FailedExhausted,
            JobError::Unexpected(_) => JobOutcome::FailedUnexpected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub job_id: JobId,
    pub outcome: JobOutcome,
    /// Attempts actually made; 0 for skipped jobs.
    pub attempts: u32,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Final snapshot plus one report per job, in completion order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub snapshot: ProgressSnapshot,
    pub reports: Vec<JobReport>,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = &JobReport> {
        self.reports.iter().filter(|r| r.outcome.is_failure())
    }
}

/// Executes the jobs of a step.
///
/// A runner can be reused for several runs; progress is reset by each run.
/// Jobs of one run are expected to have distinct ids (see
/// [`pipeline_core::deduplicate`]); attempt bookkeeping is keyed by id.
pub struct StepRunner<S> {
    step: S,
    settings: RunnerSettings,
    limiter: Arc<RateLimiter>,
    hooks: HookRegistry,
    progress: Progress,
    shutdown: ShutdownFlag,
    attempts: Mutex<HashMap<JobId, u32>>,
}

impl<S: Step> StepRunner<S> {
    pub fn new(step: S, settings: RunnerSettings) -> Self {
        let progress = Progress::new(step.name());
        Self {
            step,
            settings,
            limiter: Arc::new(RateLimiter::unlimited()),
            hooks: HookRegistry::default(),
            progress,
            shutdown: ShutdownFlag::default(),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    /// Share an externally owned flag (e.g. one wired to SIGINT).
    pub fn with_shutdown(mut self, shutdown: ShutdownFlag) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn step(&self) -> &S {
        &self.step
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn shutdown_handle(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    /// Stop starting new jobs. Jobs already running finish normally.
    pub fn request_shutdown(&self) {
        if self.shutdown.request() {
            info!(step = self.step.name(), "shutdown requested");
        }
    }

    /// Jobs with an attempt in progress.
    pub fn attempts_in_flight(&self) -> usize {
        self.lock_attempts().len()
    }

    pub fn run(&self, jobs: Vec<Job>) -> ProgressSnapshot {
        self.run_with_report(jobs).snapshot
    }

    pub fn run_with_report(&self, jobs: Vec<Job>) -> RunReport {
        let total = jobs.len();
        let step = self.step.name();
        self.progress.start(total);

        let mut reports = Vec::with_capacity(total);
        if total > 0 {
            let workers = self.settings.threads.clamp(1, total);
            info!(step, total, workers, "starting step run");
            self.execute(jobs, workers, &mut reports);
        } else {
            info!(step, "no jobs to run");
        }

        self.progress.finish();
        let snapshot = self.progress.snapshot();
        info!(step, progress = %snapshot, "step run finished");

        RunReport { snapshot, reports }
    }

    fn execute(&self, jobs: Vec<Job>, workers: usize, reports: &mut Vec<JobReport>) {
        let (job_tx, job_rx) = mpsc::channel();
        for job in jobs {
            // The receiver is alive until the end of this function.
            let _ = job_tx.send(job);
        }
        drop(job_tx);
        let job_rx = Mutex::new(job_rx);
        let (report_tx, report_rx) = mpsc::channel();

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for idx in 0..workers {
                let job_rx = &job_rx;
                let report_tx = report_tx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("{}-{idx}", self.step.name()))
                    .spawn_scoped(scope, move || self.worker_loop(job_rx, &report_tx));
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(err) => warn!(worker = idx, error = %err, "failed to spawn worker thread"),
                }
            }

            if handles.is_empty() {
                warn!("no worker thread available; running jobs on the driver thread");
                self.worker_loop(&job_rx, &report_tx);
            }
            drop(report_tx);

            for report in report_rx {
                self.log_report(&report);
                reports.push(report);
            }

            for handle in handles {
                if handle.join().is_err() {
                    error!(step = self.step.name(), "worker thread panicked");
                }
            }
        });
    }

    fn worker_loop(&self, jobs: &Mutex<Receiver<Job>>, reports: &Sender<JobReport>) {
        loop {
            let next = jobs.lock().unwrap_or_else(PoisonError::into_inner).recv();
            let Ok(job) = next else {
                break;
            };

            let report = if self.shutdown.is_requested() {
                self.skip_job(&job)
            } else {
                self.process_job(job)
            };

            if reports.send(report).is_err() {
                break;
            }
        }
    }

    fn skip_job(&self, job: &Job) -> JobReport {
        self.progress.mark_skipped();
        debug!(job_id = %job.id(), "shutdown requested; job skipped");
        JobReport {
            job_id: job.id(),
            outcome: JobOutcome::SkippedShutdown,
            attempts: 0,
            error: None,
            duration_ms: 0,
        }
    }

    fn process_job(&self, mut job: Job) -> JobReport {
        let job_id = job.id();
        let correlation_id = CorrelationId::new();
        let span = info_span!(
            "job",
            step = self.step.name(),
            job_id = %job_id,
            correlation_id = %correlation_id
        );
        let _entered = span.enter();

        self.progress.begin_job();
        let started = Instant::now();

        let result = self.settings.retry.run(|_| {
            // A panicking attempt counts as an unclassified failure and is retried.
            panic::catch_unwind(AssertUnwindSafe(|| {
                self.execute_attempt(&mut job, &job_id, correlation_id)
            }))
            .unwrap_or_else(|payload| {
                Err(StepError::unexpected(format!(
                    "panic: {}",
                    panic_message(&*payload)
                )))
            })
        });

        let attempts = self.lock_attempts().remove(&job_id).unwrap_or(0);
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                self.progress.mark_completed();
                info!(attempts, duration_ms, "job completed");
                JobReport {
                    job_id,
                    outcome: JobOutcome::Completed,
                    attempts,
                    error: None,
                    duration_ms,
                }
            }
            Err(err) => {
                self.progress.mark_failed();
                self.fire_error_hooks(&job, &err);
                JobReport {
                    job_id,
                    outcome: JobOutcome::from(&err),
                    attempts,
                    error: Some(err.to_string()),
                    duration_ms,
                }
            }
        }
    }

    fn execute_attempt(
        &self,
        job: &mut Job,
        job_id: &JobId,
        correlation_id: CorrelationId,
    ) -> StepResult {
        let attempt = {
            let mut attempts = self.lock_attempts();
            let counter = attempts.entry(job_id.clone()).or_insert(0);
            *counter += 1;
            *counter
        };
        let span = info_span!("attempt", attempt);
        let _entered = span.enter();

        job.stamp_attempt(attempt);

        self.hooks
            .run_before(job)
            .map_err(|err| StepError::unexpected(format!("before hook failed: {err:#}")))?;

        let ctx = JobContext::new(&self.limiter, attempt, correlation_id);
        self.step.process(job, &ctx)?;

        self.hooks
            .run_after(job)
            .map_err(|err| StepError::unexpected(format!("after hook failed: {err:#}")))
    }

    fn fire_error_hooks(&self, job: &Job, err: &JobError) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.hooks.run_error(job, err))) {
            Ok(Ok(())) => {}
            Ok(Err(hook_err)) => {
                let message = format!("{hook_err:#}");
                warn!(error = %message, "error hook failed");
            }
            Err(payload) => {
                warn!(panic = panic_message(&*payload), "error hook panicked");
            }
        }
    }

    fn log_report(&self, report: &JobReport) {
        let step = self.step.name();
        match report.outcome {
            JobOutcome::Completed => {}
            JobOutcome::SkippedShutdown => return,
            outcome => error!(
                step,
                job_id = %report.job_id,
                ?outcome,
                attempts = report.attempts,
                error = report.error.as_deref().unwrap_or_default(),
                "job failed"
            ),
        }
        info!(step, progress = %self.progress.snapshot(), "progress");
    }

    fn lock_attempts(&self) -> MutexGuard<'_, HashMap<JobId, u32>> {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: Step> std::fmt::Debug for StepRunner<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRunner")
            .field("step", &self.step.name())
            .field("settings", &self.settings)
            .field("hooks", &self.hooks)
            .field("shutdown", &self.shutdown.is_requested())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic payload"
    }
}
