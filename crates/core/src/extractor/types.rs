use serde::{Deserialize, Serialize};

/// One item returned by metadata extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Duration in seconds, when the tool reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

/// Structured event recognized in a progress line.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Metadata was resolved and the tool is about to download.
    MetadataFetched,
    /// Download percentage (0-100).
    Percent(f32),
    /// The tool announced the file it is downloading into.
    Destination(String),
    /// Post-processing (audio extraction) started.
    Converting { destination: Option<String> },
}
