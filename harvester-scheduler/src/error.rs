//! Error types for harvester-scheduler.

use thiserror::Error;

use harvester_core::error::StateError;
use harvester_detector::DetectError;
use harvester_session::error::SessionError;
use harvester_store::error::StoreError;

/// All errors that can arise while orchestrating a run.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Detect(#[from] DetectError),

    /// A background task could not be joined (panic or runtime teardown).
    #[error("background task failed: {0}")]
    Join(String),

    /// The run was interrupted from outside (ctrl-c). Never swallowed.
    #[error("run interrupted")]
    Interrupted,
}

pub(crate) fn join_err(err: tokio::task::JoinError) -> SchedulerError {
    SchedulerError::Join(err.to_string())
}
