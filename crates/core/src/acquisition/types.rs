use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::AcquisitionError;

/// One identifier to acquire, with its media duration when known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionRequest {
    pub identifier: String,
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

impl AcquisitionRequest {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            duration_secs: None,
        }
    }

    pub fn with_duration(mut self, duration_secs: Option<f64>) -> Self {
        self.duration_secs = duration_secs;
        self
    }
}

/// Final outcome of one acquisition. Produced exactly once per task.
#[derive(Debug, Clone, PartialEq)]
pub enum SettledResult {
    Success {
        identifier: String,
        /// Where the tool wrote the file.
        file_path: PathBuf,
        /// Sanitized name for the archive, before collision resolution.
        entry_name: String,
        title: Option<String>,
    },
    Failure {
        identifier: String,
        error: AcquisitionError,
    },
}

impl SettledResult {
    pub fn identifier(&self) -> &str {
        match self {
            SettledResult::Success { identifier, .. } | SettledResult::Failure { identifier, .. } => {
                identifier
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SettledResult::Success { .. })
    }

    pub fn error(&self) -> Option<&AcquisitionError> {
        match self {
            SettledResult::Failure { error, .. } => Some(error),
            SettledResult::Success { .. } => None,
        }
    }
}

/// Longest media duration fed into the timeout computation (about 115 days).
const MAX_MEDIA_SECS: f64 = 10_000_000.0;

/// Per-task deadline: `max(floor, duration × per_media_second)`, or the floor
/// when the duration is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    floor: Duration,
    per_media_second: Duration,
}

impl TimeoutPolicy {
    pub fn new(floor: Duration, per_media_second: Duration) -> Self {
        Self {
            floor,
            per_media_second,
        }
    }

    pub fn floor(&self) -> Duration {
        self.floor
    }

    pub fn for_duration(&self, duration_secs: Option<f64>) -> Duration {
        match duration_secs {
            Some(secs) if secs.is_finite() && secs > 0.0 => {
                let scaled = self.per_media_second.mul_f64(secs.min(MAX_MEDIA_SECS));
                scaled.max(self.floor)
            }
            _ => self.floor,
        }
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_millis(2000))
    }
}
