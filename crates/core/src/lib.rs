//! `pipeline-core`: job model and error taxonomy shared by the runtime.
//!
//! No threads and no IO live here.

pub mod error;
pub mod id;
pub mod job;

pub use error::{JobError, StepError, StepResult};
pub use id::{CorrelationId, JobId};
pub use job::{
    ATTEMPT_FIELD, Job, JobRange, Payload, RangeError, deduplicate, filter_by_range, make_job,
};
