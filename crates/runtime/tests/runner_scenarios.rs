use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use pipeline_config::RateLimit;
use pipeline_core::{Job, Payload, StepError, StepResult, deduplicate, make_job};
use pipeline_runtime::{
    HookRegistry, JobContext, JobOutcome, RateLimiter, RetryPolicy, RunnerSettings, ShutdownFlag,
    Step, StepRunner,
};
use serde_json::json;

fn numbered_jobs(step: &str, n: u64) -> Vec<Job> {
    (1..=n)
        .map(|i| {
            let mut payload = Payload::new();
            payload.insert("n".into(), json!(i));
            make_job(step, payload, &["n"])
        })
        .collect()
}

fn settings(threads: usize, attempts: u32, delays: Vec<Duration>) -> RunnerSettings {
    RunnerSettings::new(threads, RetryPolicy::new(attempts, delays))
}

/// Test step whose behaviour per job is decided by a closure over `n`.
struct ScriptedStep<F> {
    calls: AtomicU32,
    behaviour: F,
}

impl<F> ScriptedStep<F>
where
    F: Fn(u64, u32) -> StepResult + Send + Sync,
{
    fn new(behaviour: F) -> Self {
        Self {
            calls: AtomicU32::new(0),
            behaviour,
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<F> Step for ScriptedStep<F>
where
    F: Fn(u64, u32) -> StepResult + Send + Sync,
{
    fn name(&self) -> &str {
        "scripted"
    }

    fn load_jobs(&self) -> Result<Vec<Job>, StepError> {
        Ok(numbered_jobs("scripted", 3))
    }

    fn process(&self, job: &Job, ctx: &JobContext<'_>) -> StepResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let n = job.get("n").and_then(|v| v.as_u64()).unwrap_or(0);
        (self.behaviour)(n, ctx.attempt())
    }
}

#[test]
fn all_jobs_succeed() {
    let step = ScriptedStep::new(|_, _| Ok(()));
    let runner = StepRunner::new(&step, settings(4, 3, vec![]));

    let snap = runner.run(numbered_jobs("scripted", 10));

    assert_eq!(snap.total, 10);
    assert_eq!(snap.completed, 10);
    assert_eq!(snap.failed, 0);
    assert_eq!(snap.skipped, 0);
    assert_eq!(snap.in_progress, 0);
    assert_eq!(step.calls(), 10);
}

#[test]
fn fatal_job_fails_alone_without_retry() {
    let step = ScriptedStep::new(|n, _| {
        if n == 3 {
            Err(StepError::fatal("missing title"))
        } else {
            Ok(())
        }
    });
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    let hooks = HookRegistry::new().with_error(move |job, err| {
        sink.lock().unwrap().push((job.id().to_string(), err.kind()));
        Ok(())
    });
    let runner = StepRunner::new(&step, settings(4, 3, vec![])).with_hooks(hooks);

    let report = runner.run_with_report(numbered_jobs("scripted", 5));

    assert_eq!(report.snapshot.completed, 4);
    assert_eq!(report.snapshot.failed, 1);
    assert_eq!(step.calls(), 5);
    assert_eq!(
        *errors.lock().unwrap(),
        vec![("scripted:3".to_string(), "fatal")]
    );

    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].outcome, JobOutcome::FailedFatal);
    assert_eq!(failures[0].attempts, 1);
}

#[test]
fn retryable_job_exhausts_attempts_with_delays() {
    let step = ScriptedStep::new(|_, _| Err(StepError::retryable("503 service unavailable")));
    let runner = StepRunner::new(
        &step,
        settings(2, 3, vec![Duration::from_secs(1), Duration::from_secs(2)]),
    );

    let started = Instant::now();
    let report = runner.run_with_report(numbered_jobs("scripted", 1));
    let elapsed = started.elapsed();

    assert_eq!(step.calls(), 3);
    assert!(elapsed >= Duration::from_secs(3), "elapsed = {elapsed:?}");
    assert_eq!(report.snapshot.failed, 1);
    assert_eq!(report.reports[0].outcome, JobOutcome::FailedExhausted);
    assert_eq!(report.reports[0].attempts, 3);
}

#[test]
fn shutdown_before_run_skips_everything() {
    let step = ScriptedStep::new(|_, _| Ok(()));
    let runner = StepRunner::new(&step, settings(4, 3, vec![]));
    runner.request_shutdown();

    let report = runner.run_with_report(numbered_jobs("scripted", 5));

    assert_eq!(report.snapshot.skipped, 5);
    assert_eq!(report.snapshot.completed, 0);
    assert_eq!(step.calls(), 0);
    assert!(
        report
            .reports
            .iter()
            .all(|r| r.outcome == JobOutcome::SkippedShutdown)
    );
}

#[test]
fn shutdown_mid_run_lets_in_flight_jobs_finish() {
    let shutdown = ShutdownFlag::new();
    let trigger = shutdown.clone();
    let step = ScriptedStep::new(move |n, _| {
        if n == 1 {
            trigger.request();
        }
        Ok(())
    });
    let runner = StepRunner::new(&step, settings(1, 1, vec![])).with_shutdown(shutdown);

    let snap = runner.run(numbered_jobs("scripted", 4));

    // Single worker: job 1 completes, the rest are never started.
    assert_eq!(snap.completed, 1);
    assert_eq!(snap.skipped, 3);
    assert_eq!(snap.completed + snap.failed + snap.skipped, snap.total);
}

#[test]
fn hooks_fire_around_each_attempt() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let (before, after, on_error) = (events.clone(), events.clone(), events.clone());
    let hooks = HookRegistry::new()
        .with_before(move |job| {
            before
                .lock()
                .unwrap()
                .push(format!("before#{}", job.attempt().unwrap_or(0)));
            Ok(())
        })
        .with_after(move |job| {
            after
                .lock()
                .unwrap()
                .push(format!("after#{}", job.attempt().unwrap_or(0)));
            Ok(())
        })
        .with_error(move |_, err| {
            on_error.lock().unwrap().push(format!("error:{}", err.kind()));
            Ok(())
        });

    // First attempt fails transiently, the second succeeds.
    let step = ScriptedStep::new(|_, attempt| {
        if attempt == 1 {
            Err(StepError::retryable("timeout"))
        } else {
            Ok(())
        }
    });
    let runner = StepRunner::new(&step, settings(1, 3, vec![])).with_hooks(hooks);

    let snap = runner.run(numbered_jobs("scripted", 1));

    assert_eq!(snap.completed, 1);
    assert_eq!(*events.lock().unwrap(), vec!["before#1", "before#2", "after#2"]);
}

#[test]
fn failing_before_hook_counts_as_unexpected_and_is_retried() {
    let hooks = HookRegistry::new().with_before(|_| anyhow::bail!("audit store down"));
    let step = ScriptedStep::new(|_, _| Ok(()));
    let runner = StepRunner::new(&step, settings(1, 2, vec![])).with_hooks(hooks);

    let report = runner.run_with_report(numbered_jobs("scripted", 1));

    assert_eq!(step.calls(), 0);
    assert_eq!(report.reports[0].outcome, JobOutcome::FailedExhausted);
    assert_eq!(report.reports[0].attempts, 2);
    assert!(
        report.reports[0]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("audit store down"))
    );
}

#[test]
fn broken_error_hooks_do_not_disturb_the_run() {
    // Even jobs fail; the error hook panics for job 2 and errors for the others.
    let step = ScriptedStep::new(|n, _| {
        if n % 2 == 0 {
            Err(StepError::fatal("rejected"))
        } else {
            Ok(())
        }
    });
    let hooks = HookRegistry::new().with_error(|job, _| {
        if job.id().short() == "2" {
            panic!("error sink crashed");
        }
        anyhow::bail!("error sink unavailable")
    });
    let runner = StepRunner::new(&step, settings(3, 1, vec![])).with_hooks(hooks);

    let report = runner.run_with_report(numbered_jobs("scripted", 6));

    assert_eq!(report.snapshot.completed, 3);
    assert_eq!(report.snapshot.failed, 3);
    assert_eq!(report.snapshot.in_progress, 0);
    assert_eq!(report.reports.len(), 6);
    assert!(
        report
            .failures()
            .all(|r| r.outcome == JobOutcome::FailedFatal)
    );
    assert_eq!(runner.attempts_in_flight(), 0);
}

#[test]
fn counters_balance_for_mixed_outcomes() {
    let step = ScriptedStep::new(|n, _| match n % 3 {
        0 => Err(StepError::fatal("bad")),
        1 => Err(StepError::retryable("flaky")),
        _ => Ok(()),
    });
    let runner = StepRunner::new(&step, settings(8, 2, vec![]));

    let snap = runner.run(numbered_jobs("scripted", 30));

    assert_eq!(snap.completed + snap.failed + snap.skipped, snap.total);
    assert_eq!(snap.in_progress, 0);
    assert_eq!(snap.completed, 10);
    assert_eq!(snap.failed, 20);
    assert_eq!(runner.attempts_in_flight(), 0);
}

#[test]
fn deduplicated_jobs_run_once() {
    let step = ScriptedStep::new(|_, _| Ok(()));
    let runner = StepRunner::new(&step, settings(4, 1, vec![]));

    let mut jobs = numbered_jobs("scripted", 5);
    jobs.extend(numbered_jobs("scripted", 5));
    let snap = runner.run(deduplicate(jobs));

    assert_eq!(snap.total, 5);
    assert_eq!(step.calls(), 5);
}

#[test]
fn shared_rate_limit_spaces_calls() {
    let mut plan = BTreeMap::new();
    plan.insert("tts".to_string(), RateLimit::new(600, 1));
    let limiter = Arc::new(RateLimiter::new(&plan));

    let served = AtomicUsize::new(0);
    struct Limited<'a> {
        served: &'a AtomicUsize,
    }
    impl Step for Limited<'_> {
        fn name(&self) -> &str {
            "limited"
        }
        fn load_jobs(&self) -> Result<Vec<Job>, StepError> {
            Ok(Vec::new())
        }
        fn process(&self, _job: &Job, ctx: &JobContext<'_>) -> StepResult {
            ctx.acquire("tts");
            self.served.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    // 600/min = one token every 100ms; 4 jobs across 4 workers need >= 300ms.
    let runner = StepRunner::new(Limited { served: &served }, settings(4, 1, vec![]))
        .with_rate_limiter(limiter);
    let started = Instant::now();
    let snap = runner.run(numbered_jobs("limited", 4));

    assert_eq!(snap.completed, 4);
    assert_eq!(served.load(Ordering::SeqCst), 4);
    assert!(started.elapsed() >= Duration::from_millis(300));
}
