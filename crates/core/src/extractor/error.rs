//! Error types for the extractor module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while talking to the extraction tool.
#[derive(Debug, Error)]
pub enum ExtractorError {
    /// Extractor program not found.
    #[error("Extractor not found at path: {path}")]
    ProgramNotFound { path: PathBuf },

    /// The tool exited unsuccessfully.
    #[error("Extraction failed: {reason}")]
    Failed {
        reason: String,
        stderr: Option<String>,
    },

    /// The tool did not finish in time.
    #[error("Extraction timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// Output could not be parsed as JSON or newline-delimited JSON.
    #[error("Failed to parse extractor output: {reason}")]
    Unparseable { reason: String },

    /// I/O error while running the tool.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractorError {
    /// Creates a failure from the tool's stderr and exit code.
    pub fn failed(stderr: &str, code: Option<i32>) -> Self {
        let stderr_owned = stderr.trim();
        Self::Failed {
            reason: failure_reason(stderr, code),
            stderr: if stderr_owned.is_empty() {
                None
            } else {
                Some(stderr_owned.to_string())
            },
        }
    }

    /// Creates an unparseable-output error.
    pub fn unparseable(reason: impl Into<String>) -> Self {
        Self::Unparseable {
            reason: reason.into(),
        }
    }

    /// Maps a spawn error, distinguishing a missing program.
    pub fn from_spawn(err: std::io::Error, program: &std::path::Path) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::ProgramNotFound {
                path: program.to_path_buf(),
            }
        } else {
            Self::Io(err)
        }
    }
}

/// Short diagnostic for a failed run: the last non-empty stderr line without
/// its `ERROR:` prefix, or the exit code when stderr is silent.
pub fn failure_reason(stderr: &str, code: Option<i32>) -> String {
    let last = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last();

    match last {
        Some(line) => line.strip_prefix("ERROR:").unwrap_or(line).trim().to_string(),
        None => match code {
            Some(code) => format!("extractor exited with code {}", code),
            None => "extractor terminated by signal".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reason_uses_last_stderr_line() {
        let stderr = "WARNING: something odd\nERROR: [youtube] abc: Video unavailable\n\n";
        assert_eq!(
            failure_reason(stderr, Some(1)),
            "[youtube] abc: Video unavailable"
        );
    }

    #[test]
    fn test_failure_reason_falls_back_to_exit_code() {
        assert_eq!(failure_reason("  \n", Some(2)), "extractor exited with code 2");
        assert_eq!(failure_reason("", None), "extractor terminated by signal");
    }

    #[test]
    fn test_failed_keeps_stderr() {
        let err = ExtractorError::failed("ERROR: not found", Some(1));
        match err {
            ExtractorError::Failed { reason, stderr } => {
                assert_eq!(reason, "not found");
                assert_eq!(stderr.as_deref(), Some("ERROR: not found"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_from_spawn_not_found() {
        let err = ExtractorError::from_spawn(
            std::io::Error::from(std::io::ErrorKind::NotFound),
            std::path::Path::new("/missing/yt-dlp"),
        );
        assert!(matches!(err, ExtractorError::ProgramNotFound { .. }));
        assert_eq!(err.to_string(), "Extractor not found at path: /missing/yt-dlp");
    }
}
