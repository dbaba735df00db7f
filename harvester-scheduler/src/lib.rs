//! # harvester-scheduler
//!
//! Update orchestration: the per-account fetch scheduler with its
//! application/depot locking scheme, and the top-level run pipeline that
//! builds the work list, bounds account concurrency, and persists state.

pub mod error;
pub mod pipeline;
pub mod scheduler;

pub use error::SchedulerError;
pub use pipeline::{run, RunOptions, RunSummary};
pub use scheduler::{FetchScheduler, SchedulerConfig, UserOutcome};
