//! Run counters, elapsed time and ETA.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Default)]
struct ProgressState {
    total: usize,
    completed: usize,
    failed: usize,
    skipped: usize,
    in_progress: usize,
    started: Option<Instant>,
    started_at: Option<DateTime<Utc>>,
}

impl ProgressState {
    fn processed(&self) -> usize {
        self.completed + self.failed + self.skipped
    }

    fn snapshot(&self, now: Instant) -> ProgressSnapshot {
        let elapsed_sec = self
            .started
            .map(|started| now.saturating_duration_since(started).as_secs_f64())
            .unwrap_or(0.0);

        let processed = self.processed();
        let eta_sec = if processed > 0 && elapsed_sec > 0.0 {
            let rate = processed as f64 / elapsed_sec;
            let remaining = self.total.saturating_sub(processed) as f64;
            Some(remaining / rate)
        } else {
            None
        };

        ProgressSnapshot {
            total: self.total,
            completed: self.completed,
            failed: self.failed,
            skipped: self.skipped,
            in_progress: self.in_progress,
            started_at: self.started_at,
            elapsed_sec,
            eta_sec,
        }
    }
}

/// Thread-safe progress of one step run.
#[derive(Debug)]
pub struct Progress {
    step: String,
    state: Mutex<ProgressState>,
}

impl Progress {
    pub fn new(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            state: Mutex::new(ProgressState::default()),
        }
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    // A worker that panicked while holding the lock leaves counters that are
    // still consistent, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reset the counters for a run over `total` jobs and start the clock.
    pub fn start(&self, total: usize) {
        self.start_at(total, Instant::now());
    }

    fn start_at(&self, total: usize, now: Instant) {
        let mut state = self.lock();
        *state = ProgressState {
            total,
            started: Some(now),
            started_at: Some(Utc::now()),
            ..ProgressState::default()
        };
    }

    pub fn begin_job(&self) {
        self.lock().in_progress += 1;
    }

    pub fn mark_completed(&self) {
        let mut state = self.lock();
        state.in_progress = state.in_progress.saturating_sub(1);
        state.completed += 1;
    }

    pub fn mark_failed(&self) {
        let mut state = self.lock();
        state.in_progress = state.in_progress.saturating_sub(1);
        state.failed += 1;
    }

    /// Count a job that was never started.
    pub fn mark_skipped(&self) {
        self.lock().skipped += 1;
    }

    /// Close the run. Nothing can be in flight any more.
    pub fn finish(&self) {
        self.lock().in_progress = 0;
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot_at(Instant::now())
    }

    fn snapshot_at(&self, now: Instant) -> ProgressSnapshot {
        self.lock().snapshot(now)
    }
}

/// Point-in-time copy of a run's progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub in_progress: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_sec: f64,
    /// `None` until at least one job has been processed.
    pub eta_sec: Option<f64>,
}

impl ProgressSnapshot {
    /// Jobs that reached a terminal state.
    pub fn processed(&self) -> usize {
        self.completed + self.failed + self.skipped
    }

    pub fn is_complete(&self) -> bool {
        self.processed() >= self.total && self.in_progress == 0
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "done={}/{} failed={} skipped={} in_progress={} elapsed={:.1}s",
            self.completed, self.total, self.failed, self.skipped, self.in_progress, self.elapsed_sec
        )?;
        match self.eta_sec {
            Some(eta) => write!(f, " eta={eta:.1}s"),
            None => f.write_str(" eta=?"),
        }
    }
}
