//! Job execution runtime: bounded worker pool, retry, rate limiting,
//! progress tracking, lifecycle hooks and cooperative shutdown.

pub mod hooks;
pub mod progress;
pub mod rate_limit;
pub mod retry;
pub mod runner;
pub mod shutdown;
pub mod step;

pub use hooks::{ErrorHook, HookRegistry, JobHook};
pub use progress::{Progress, ProgressSnapshot};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
pub use runner::{JobOutcome, JobReport, RunReport, RunnerSettings, StepRunner};
pub use shutdown::ShutdownFlag;
pub use step::{JobContext, NoOpStep, Step};
