//! Error taxonomy for a synchronisation run.

use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while moving issues onto the board.
///
/// `Transport` and the cursor variants abort the run. `MalformedData` and
/// `Reconciliation` are scoped to one record and end up in the run report.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A collaborator (tracker or board) could not be reached or refused the call.
    #[error("{context}")]
    Transport {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    /// A fetched record lacked a required field.
    #[error("malformed record {record}: {reason}")]
    MalformedData { record: String, reason: String },

    /// Creating a card or adding a comment failed for one staging record.
    #[error("{context} for issue #{remote_id}")]
    Reconciliation {
        remote_id: String,
        context: String,
        #[source]
        source: anyhow::Error,
    },

    /// The cursor file could not be read or written.
    #[error("cursor I/O error at {path}: {source}")]
    CursorIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The cursor file exists but does not hold a timestamp.
    #[error("cursor at {path} is unreadable: {reason}")]
    CursorCorrupt { path: PathBuf, reason: String },
}

impl SyncError {
    pub(crate) fn transport(context: impl Into<String>, source: anyhow::Error) -> Self {
        SyncError::Transport {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn reconciliation(
        remote_id: &str,
        context: impl Into<String>,
        source: anyhow::Error,
    ) -> Self {
        SyncError::Reconciliation {
            remote_id: remote_id.to_string(),
            context: context.into(),
            source,
        }
    }

    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Transport { .. } | SyncError::CursorIo { .. } | SyncError::CursorCorrupt { .. }
        )
    }
}

/// Convenience constructor for [`SyncError::CursorIo`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::CursorIo {
        path: path.into(),
        source,
    }
}

/// Render an error with its whole `source()` chain on one line.
pub fn describe(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut next = err.source();
    while let Some(cause) = next {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        next = cause.source();
    }
    out
}
