//! Bounded retry with a delay schedule.

use std::thread;
use std::time::Duration;

use pipeline_config::RetrySettings;
use pipeline_core::{JobError, StepError};
use tracing::{error, warn};

/// How often and how patiently a job is re-attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    /// `attempts` counts the first try; values below 1 are raised to 1.
    pub fn new(attempts: u32, delays: Vec<Duration>) -> Self {
        Self {
            attempts: attempts.max(1),
            delays,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(settings.attempts, settings.delays())
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self::new(1, Vec::new())
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Sleep before the retry that follows `attempt` (1-based).
    ///
    /// The last configured delay repeats once the schedule runs out.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let Some(last) = self.delays.len().checked_sub(1) else {
            return Duration::ZERO;
        };
        let idx = (attempt.saturating_sub(1) as usize).min(last);
        self.delays[idx]
    }

    /// Run `op` until it succeeds, fails fatally or runs out of attempts.
    ///
    /// `op` receives the 1-based attempt number.
    pub fn run<T, F>(&self, mut op: F) -> Result<T, JobError>
    where
        F: FnMut(u32) -> Result<T, StepError>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(StepError::Fatal(msg)) => return Err(JobError::Fatal(msg)),
                Err(err) if attempt >= self.attempts => {
                    error!(
                        attempts = self.attempts,
                        error = %err,
                        "retry attempts exhausted"
                    );
                    return Err(JobError::RetryExhausted {
                        attempts: self.attempts,
                        last: err,
                    });
                }
                Err(err) => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.attempts,
                        delay_ms = delay.as_millis() as u64,
                        kind = err.kind(),
                        error = %err,
                        "attempt failed; retrying"
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn success_on_first_attempt() {
        let policy = RetryPolicy::new(3, vec![Duration::from_secs(5)]);
        let mut calls = 0;

        let value = policy
            .run(|_| {
                calls += 1;
                Ok::<_, StepError>(42)
            })
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls, 1);
    }

    #[test]
    fn fatal_is_not_retried() {
        let policy = RetryPolicy::new(5, Vec::new());
        let mut calls = 0;

        let err = policy
            .run(|_| {
                calls += 1;
                Err::<(), _>(StepError::fatal("bad input"))
            })
            .unwrap_err();

        assert_eq!(err, JobError::Fatal("bad input".to_string()));
        assert_eq!(calls, 1);
    }

    #[test]
    fn retryable_eventually_succeeds() {
        let policy = RetryPolicy::new(3, Vec::new());

        let seen = policy
            .run(|attempt| {
                if attempt < 3 {
                    Err(StepError::retryable("503"))
                } else {
                    Ok(attempt)
                }
            })
            .unwrap();

        assert_eq!(seen, 3);
    }

    #[test]
    fn unexpected_errors_are_retried_then_exhausted() {
        let policy = RetryPolicy::new(2, Vec::new());
        let mut attempts_seen = Vec::new();

        let err = policy
            .run(|attempt| {
                attempts_seen.push(attempt);
                Err::<(), _>(StepError::unexpected(format!("boom {attempt}")))
            })
            .unwrap_err();

        assert_eq!(attempts_seen, vec![1, 2]);
        assert_eq!(
            err,
            JobError::RetryExhausted {
                attempts: 2,
                last: StepError::unexpected("boom 2"),
            }
        );
    }

    #[test]
    fn last_delay_repeats() {
        let policy = RetryPolicy::new(
            5,
            vec![Duration::from_secs(1), Duration::from_secs(2)],
        );

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(2));
        assert_eq!(RetryPolicy::no_retry().delay_for_attempt(1), Duration::ZERO);
    }

    #[test]
    fn retries_sleep_between_attempts() {
        let policy = RetryPolicy::new(
            3,
            vec![Duration::from_millis(100), Duration::from_millis(200)],
        );

        let started = Instant::now();
        let _ = policy.run(|_| Err::<(), _>(StepError::retryable("again")));

        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Vec::new()).attempts(), 1);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Retryable failures use every attempt; fatal ones use exactly one.
            #[test]
            fn invocation_counts(attempts in 1u32..8, fatal in any::<bool>()) {
                let policy = RetryPolicy::new(attempts, Vec::new());
                let mut calls = 0u32;

                let result = policy.run(|_| {
                    calls += 1;
                    if fatal {
                        Err::<(), _>(StepError::fatal("no"))
                    } else {
                        Err(StepError::retryable("later"))
                    }
                });

                prop_assert!(result.is_err());
                prop_assert_eq!(calls, if fatal { 1 } else { attempts });
            }
        }
    }
}
