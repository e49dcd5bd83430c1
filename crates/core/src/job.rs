//! Job model, deduplication and range selection.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::id::JobId;

/// Opaque job payload (a JSON object).
pub type Payload = Map<String, Value>;

/// Payload key the runner stamps with the current attempt number.
pub const ATTEMPT_FIELD: &str = "_attempt";

/// A single unit of work produced by a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    step: String,
    payload: Payload,
    dedup_key: String,
}

impl Job {
    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn dedup_key(&self) -> &str {
        &self.dedup_key
    }

    pub fn id(&self) -> JobId {
        JobId::new(&self.step, &self.dedup_key)
    }

    /// Look up a payload field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }

    /// Look up a string payload field.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }

    /// Attempt number stamped by the runner, if the job has been executed.
    pub fn attempt(&self) -> Option<u32> {
        self.payload
            .get(ATTEMPT_FIELD)
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
    }

    /// Record the attempt about to be made. Only the executing worker owns the
    /// job at this point, so this is the one mutation a job ever sees.
    pub fn stamp_attempt(&mut self, attempt: u32) {
        self.payload
            .insert(ATTEMPT_FIELD.to_string(), Value::from(attempt));
    }
}

/// Build a job whose dedup key is derived from `key_fields`.
///
/// Values of the listed fields that are present in the payload are joined
/// with `:` in the given order. When none of them is present the job gets a
/// random key and is never collapsed with another job.
pub fn make_job(step: impl Into<String>, payload: Payload, key_fields: &[&str]) -> Job {
    let parts: Vec<String> = key_fields
        .iter()
        .filter_map(|field| payload.get(*field))
        .map(key_part)
        .collect();

    let dedup_key = if parts.is_empty() {
        Uuid::new_v4().simple().to_string()
    } else {
        parts.join(":")
    };

    Job {
        step: step.into(),
        payload,
        dedup_key,
    }
}

fn key_part(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Collapse jobs sharing a dedup key.
///
/// The last job for a key wins; it takes the slot where the key was first
/// seen, so the output keeps the order in which keys first appeared.
pub fn deduplicate(jobs: impl IntoIterator<Item = Job>) -> Vec<Job> {
    let mut seen: IndexMap<String, Job> = IndexMap::new();
    for job in jobs {
        seen.insert(job.dedup_key.clone(), job);
    }
    seen.into_values().collect()
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("range must contain exactly two integers (got {0})")]
    WrongArity(usize),
}

/// 1-based inclusive selection window over an ordered list.
///
/// `end == -1` means "until the end"; a `start` below 1 is treated as 1.
/// Any other `end` below `start` (e.g. `[5, 3]` or `[1, -2]`) is a valid,
/// empty window.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<i64>", into = "Vec<i64>")]
pub struct JobRange {
    start: i64,
    end: i64,
}

impl JobRange {
    pub const OPEN_END: i64 = -1;

    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start: start.max(1),
            end,
        }
    }

    /// The whole list.
    pub fn full() -> Self {
        Self {
            start: 1,
            end: Self::OPEN_END,
        }
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> Option<i64> {
        (self.end != Self::OPEN_END).then_some(self.end)
    }

    /// Whether the 1-based `index` falls inside the window.
    pub fn contains(&self, index: i64) -> bool {
        index >= self.start && (self.end == Self::OPEN_END || index <= self.end)
    }
}

impl Default for JobRange {
    fn default() -> Self {
        Self::full()
    }
}

impl TryFrom<Vec<i64>> for JobRange {
    type Error = RangeError;

    fn try_from(pair: Vec<i64>) -> Result<Self, Self::Error> {
        match pair.as_slice() {
            [start, end] => Ok(JobRange::new(*start, *end)),
            other => Err(RangeError::WrongArity(other.len())),
        }
    }
}

impl From<JobRange> for Vec<i64> {
    fn from(range: JobRange) -> Self {
        vec![range.start, range.end]
    }
}

/// Keep the items whose 1-based position falls inside `range`.
pub fn filter_by_range<T>(items: impl IntoIterator<Item = T>, range: JobRange) -> Vec<T> {
    items
        .into_iter()
        .zip(1_i64..)
        .skip_while(|(_, index)| *index < range.start)
        .take_while(|(_, index)| range.contains(*index))
        .map(|(item, _)| item)
        .collect()
}
