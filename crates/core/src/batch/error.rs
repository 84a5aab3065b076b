use thiserror::Error;

/// Errors that end a whole batch.
///
/// Per-identifier failures never show up here; they go into the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// Reading the spooled archive or delivering it failed.
    #[error("Archive stream failed: {0}")]
    Stream(String),

    /// The archive writer failed.
    #[error("Archive write failed: {0}")]
    Archive(String),

    /// The consumer went away before the archive was complete.
    #[error("Batch aborted: consumer disconnected")]
    AbortedByConsumer,

    /// The batch workspace could not be prepared.
    #[error("Batch workspace error: {0}")]
    Workspace(String),
}

impl BatchError {
    pub fn archive(err: impl std::fmt::Display) -> Self {
        Self::Archive(err.to_string())
    }

    pub fn stream(err: impl std::fmt::Display) -> Self {
        Self::Stream(err.to_string())
    }
}
