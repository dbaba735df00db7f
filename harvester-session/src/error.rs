//! Error types for harvester-session.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from session collaborator calls.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A call exceeded its deadline. The only transient error class — see
    /// [`crate::retry`].
    #[error("{operation} timed out")]
    Timeout { operation: String },

    /// The bridge socket could not be reached.
    #[error("session bridge unavailable at {socket}: {source}")]
    BridgeUnavailable {
        socket: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An I/O error on an established bridge connection.
    #[error("bridge I/O error during {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The bridge replied with something the protocol does not allow.
    #[error("bridge protocol error: {0}")]
    Protocol(String),

    /// JSON encoding/decoding of a bridge message failed.
    #[error("bridge JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A manifest fetch came back unsuccessful with a remote status code.
    #[error("manifest fetch failed with status {code}")]
    FetchFailed { code: i32 },

    /// A stored two-factor secret is not valid base64.
    #[error("two-factor secret is not valid base64: {0}")]
    InvalidSecret(#[from] base64::DecodeError),
}

/// Convenience constructor for [`SessionError::Io`].
pub(crate) fn io_err(context: impl Into<String>, source: std::io::Error) -> SessionError {
    SessionError::Io {
        context: context.into(),
        source,
    }
}
