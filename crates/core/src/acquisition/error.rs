use thiserror::Error;

/// Why a single identifier could not be acquired.
///
/// These never fail a batch: they end up as manifest lines. Messages are
/// kept as strings so results can be cloned across tasks.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AcquisitionError {
    /// The extraction tool exited unsuccessfully.
    #[error("{message}")]
    Extraction {
        message: String,
        exit_code: Option<i32>,
    },

    /// The task ran past its deadline and was killed.
    #[error("timed out after {secs}s")]
    Timeout { secs: f64 },

    /// The tool exited cleanly but no output file was found.
    #[error("output not found")]
    OutputMissing,

    /// The batch ended before this task settled.
    #[error("cancelled")]
    Cancelled,

    /// The tool could not be started.
    #[error("failed to start extractor: {0}")]
    Spawn(String),

    #[error("I/O error: {0}")]
    Io(String),

    /// The task itself broke (e.g. panicked) before producing a result.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AcquisitionError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AcquisitionError::Extraction { .. } => "extraction",
            AcquisitionError::Timeout { .. } => "timeout",
            AcquisitionError::OutputMissing => "output_missing",
            AcquisitionError::Cancelled => "cancelled",
            AcquisitionError::Spawn(_) => "spawn",
            AcquisitionError::Io(_) => "io",
            AcquisitionError::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for AcquisitionError {
    fn from(err: std::io::Error) -> Self {
        AcquisitionError::Io(err.to_string())
    }
}
