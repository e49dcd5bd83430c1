//! Command-line driver: runs the configured steps one after another.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use pipeline_config::Config;
use pipeline_core::deduplicate;
use pipeline_runtime::{
    NoOpStep, ProgressSnapshot, RateLimiter, RunnerSettings, ShutdownFlag, Step, StepRunner,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Parser)]
#[command(name = "pipeline", version, about = "Run batch pipeline steps")]
pub struct CliArgs {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Steps to run: comma-separated names or 1-based positions (default: all)
    #[arg(long, value_delimiter = ',')]
    pub step: Vec<String>,

    /// Override the default worker pool size
    #[arg(long)]
    pub threads: Option<usize>,

    /// Load and count jobs without executing them
    #[arg(long)]
    pub dry_run: bool,
}

/// What happened to one selected step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepStatus {
    Disabled,
    NoJobs,
    DryRun { jobs: usize },
    Ran(ProgressSnapshot),
    /// Shutdown was requested before the step could start.
    NotStarted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepSummary {
    pub step: String,
    pub status: StepStatus,
}

/// One placeholder step per entry of `config.steps`, in config order.
pub fn builtin_steps(config: &Config) -> Vec<Box<dyn Step>> {
    if config.steps.is_empty() {
        return vec![Box::new(NoOpStep::new("noop"))];
    }
    config
        .steps
        .keys()
        .map(|name| Box::new(NoOpStep::new(name.clone())) as Box<dyn Step>)
        .collect()
}

/// Resolve `--step` selectors against the pipeline.
///
/// A selector is a step name or a 1-based position. Selection order is kept;
/// selectors that match nothing are logged and ignored. No selectors means
/// every step.
pub fn select_steps<'a>(steps: &'a [Box<dyn Step>], selectors: &[String]) -> Vec<&'a dyn Step> {
    if selectors.iter().all(|s| s.trim().is_empty()) {
        return steps.iter().map(|step| &**step).collect();
    }

    let mut selected = Vec::new();
    for selector in selectors.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let by_name = steps.iter().find(|step| step.name() == selector);
        let by_index = || {
            selector
                .parse::<usize>()
                .ok()
                .and_then(|pos| pos.checked_sub(1))
                .and_then(|idx| steps.get(idx))
        };
        match by_name.or_else(by_index) {
            Some(step) => selected.push(&**step),
            None => warn!(selector, "unknown step selector"),
        }
    }
    selected
}

/// Run the selected steps sequentially.
///
/// Each step gets its own rate limiter and runner; all of them share
/// `shutdown`, and once it is set no further step is started. Job failures
/// are reported in the summaries, not as an error. Only a step that cannot
/// produce its jobs aborts the run.
pub fn run_steps(
    config: &Config,
    steps: &[Box<dyn Step>],
    args: &CliArgs,
    shutdown: &ShutdownFlag,
) -> anyhow::Result<Vec<StepSummary>> {
    let selected = select_steps(steps, &args.step);
    if selected.is_empty() {
        info!("no steps selected for execution");
        return Ok(Vec::new());
    }

    let mut summaries = Vec::with_capacity(selected.len());
    for step in selected {
        let name = step.name().to_string();
        let status = run_one(config, step, args, shutdown)?;
        summaries.push(StepSummary { step: name, status });
    }
    Ok(summaries)
}

fn run_one(
    config: &Config,
    step: &dyn Step,
    args: &CliArgs,
    shutdown: &ShutdownFlag,
) -> anyhow::Result<StepStatus> {
    let name = step.name();

    if shutdown.is_requested() {
        info!(step = name, "shutdown requested; step not started");
        return Ok(StepStatus::NotStarted);
    }
    if !config.step_enabled(name) {
        info!(step = name, "step disabled in config");
        return Ok(StepStatus::Disabled);
    }

    info!(step = name, "loading jobs");
    let jobs = step
        .load_jobs()
        .with_context(|| format!("loading jobs for step {name}"))?;
    let loaded = jobs.len();
    let jobs = deduplicate(jobs);
    if jobs.len() < loaded {
        debug!(step = name, loaded, unique = jobs.len(), "duplicate jobs collapsed");
    }

    if jobs.is_empty() {
        info!(step = name, "no jobs to process");
        return Ok(StepStatus::NoJobs);
    }
    if args.dry_run {
        info!(step = name, jobs = jobs.len(), "dry run; skipping execution");
        return Ok(StepStatus::DryRun { jobs: jobs.len() });
    }

    let limiter = Arc::new(RateLimiter::new(&config.rate_limits));
    debug!(step = name, resources = ?limiter.resources(), "rate limits ready");

    let runner = StepRunner::new(step, RunnerSettings::from_config(config, name))
        .with_rate_limiter(limiter)
        .with_shutdown(shutdown.clone());

    info!(step = name, jobs = jobs.len(), "step started");
    let snapshot = runner.run(jobs);
    info!(
        step = name,
        total = snapshot.total,
        done = snapshot.completed,
        failed = snapshot.failed,
        skipped = snapshot.skipped,
        elapsed_sec = snapshot.elapsed_sec,
        "step completed"
    );

    Ok(StepStatus::Ran(snapshot))
}
