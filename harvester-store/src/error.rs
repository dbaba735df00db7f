//! Error types for harvester-store.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from archive operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The archive root is not an initialized git repository. Repository
    /// bootstrap happens outside a run, so this is fatal.
    #[error("archive root {path} is not a git repository: {source}")]
    NotARepository {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    /// An underlying git operation failed.
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// An application branch is resolvable neither locally nor remotely.
    /// Fatal for that application only; siblings continue.
    #[error("application {app}: branch resolvable neither locally nor remotely")]
    BranchUnresolvable { app: u32 },

    /// The repository has no history to derive the base branch from.
    #[error("archive has no usable history to derive the base branch from")]
    EmptyHistory,

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
