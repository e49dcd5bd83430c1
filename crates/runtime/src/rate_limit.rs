//! Named token buckets shared by all workers of a run.
//!
//! Buckets refill lazily: every acquire attempt first credits the tokens that
//! accrued since the previous refill, then either debits the request or
//! sleeps until the shortfall should have accrued and tries again. Waiting
//! callers poll independently, so there is no FIFO fairness between them.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use pipeline_config::RateLimit;
use tracing::debug;

/// Shortest sleep between two checks of an exhausted bucket.
const MIN_WAIT: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
struct Bucket {
    capacity: f64,
    /// Tokens per second.
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl Bucket {
    fn new(limit: &RateLimit, now: Instant) -> Self {
        let capacity = f64::from(limit.burst);
        Self {
            capacity,
            refill_rate: limit.refill_per_sec(),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: now,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        if elapsed.is_zero() {
            return;
        }
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
        state.last_refill = now;
    }

    /// Debit `weight` tokens, or report how long until they should be there.
    fn try_take(&self, weight: f64, now: Instant) -> Result<(), Duration> {
        let mut state = self.lock();
        self.refill(&mut state, now);

        if state.tokens >= weight {
            state.tokens -= weight;
            return Ok(());
        }

        let shortfall = weight - state.tokens;
        let wait = if self.refill_rate > 0.0 {
            Duration::try_from_secs_f64(shortfall / self.refill_rate).unwrap_or(Duration::MAX)
        } else {
            Duration::MAX
        };
        Err(wait)
    }
}

/// Token-bucket rate limiter with one bucket per resource name.
///
/// The set of buckets is fixed at construction; each bucket has its own lock,
/// so waiting on one resource never blocks callers of another.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: HashMap<String, Bucket>,
}

impl RateLimiter {
    /// Build one full bucket per entry of the plan.
    pub fn new(plan: &BTreeMap<String, RateLimit>) -> Self {
        let now = Instant::now();
        let buckets = plan
            .iter()
            .map(|(name, limit)| (name.clone(), Bucket::new(limit, now)))
            .collect();
        Self { buckets }
    }

    /// A limiter without buckets: every acquire returns immediately.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Block until one token of `resource` is available and take it.
    pub fn acquire(&self, resource: &str) {
        self.acquire_weighted(resource, 1.0);
    }

    /// Block until `weight` tokens of `resource` are available and take them.
    ///
    /// Unknown resources are not limited. A weight above the bucket capacity
    /// can never be satisfied and blocks forever; callers that need a bound
    /// must enforce it themselves.
    pub fn acquire_weighted(&self, resource: &str, weight: f64) {
        let Some(bucket) = self.buckets.get(resource) else {
            return;
        };
        if weight.is_nan() || weight <= 0.0 {
            return;
        }

        loop {
            match bucket.try_take(weight, Instant::now()) {
                Ok(()) => return,
                Err(wait) => {
                    let wait = wait.max(MIN_WAIT);
                    debug!(
                        resource,
                        weight,
                        wait_ms = wait.as_millis() as u64,
                        "rate limit reached; waiting for refill"
                    );
                    thread::sleep(wait);
                }
            }
        }
    }

    /// Tokens currently available in `resource` (after crediting the refill),
    /// or `None` when no such bucket exists.
    pub fn available(&self, resource: &str) -> Option<f64> {
        let bucket = self.buckets.get(resource)?;
        let mut state = bucket.lock();
        bucket.refill(&mut state, Instant::now());
        Some(state.tokens)
    }

    /// Names of the configured buckets, sorted.
    pub fn resources(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.buckets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_limited(&self, resource: &str) -> bool {
        self.buckets.contains_key(resource)
    }
}
