use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse stage of an acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Queued,
    Starting,
    FetchedMetadata,
    Downloading,
    Converting,
    Finished,
    Error,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Finished | Phase::Error)
    }
}

/// Current progress of one identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub identifier: String,
    pub phase: Phase,
    /// 0-100, as reported by the extraction tool.
    pub percent: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    /// A fresh record in the `queued` phase.
    pub fn queued(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            phase: Phase::Queued,
            percent: 0.0,
            duration_secs: None,
            title: None,
            file_name: None,
            error: None,
            started_at: None,
            finished_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Shallow merge: every field present in `update` overwrites the stored one.
    ///
    /// A lower percent is ignored while the record stays in `downloading`
    /// and the update does not move it to another phase.
    pub fn apply(&mut self, update: ProgressUpdate) {
        let mut phase_changed = false;
        if let Some(phase) = update.phase {
            phase_changed = phase != self.phase;
            self.phase = phase;
        }

        if let Some(percent) = update.percent {
            let regression =
                !phase_changed && self.phase == Phase::Downloading && percent < self.percent;
            if !regression {
                self.percent = percent;
            }
        }

        if update.duration_secs.is_some() {
            self.duration_secs = update.duration_secs;
        }
        if update.title.is_some() {
            self.title = update.title;
        }
        if update.file_name.is_some() {
            self.file_name = update.file_name;
        }
        if update.error.is_some() {
            self.error = update.error;
        }
        if update.started_at.is_some() {
            self.started_at = update.started_at;
        }
        if update.finished_at.is_some() {
            self.finished_at = update.finished_at;
        }

        self.updated_at = Utc::now();
    }
}

/// Partial record. `None` fields leave the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub phase: Option<Phase>,
    pub percent: Option<f32>,
    pub duration_secs: Option<f64>,
    pub title: Option<String>,
    pub file_name: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ProgressUpdate {
    /// Update that only moves the phase.
    pub fn phase(phase: Phase) -> Self {
        Self {
            phase: Some(phase),
            ..Default::default()
        }
    }

    pub fn with_percent(mut self, percent: f32) -> Self {
        self.percent = Some(percent);
        self
    }

    pub fn with_duration(mut self, duration_secs: Option<f64>) -> Self {
        self.duration_secs = duration_secs;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn started_now(mut self) -> Self {
        self.started_at = Some(Utc::now());
        self
    }

    pub fn finished_now(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }
}
