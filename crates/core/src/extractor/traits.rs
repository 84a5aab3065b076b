//! Extractor trait definition.

use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

use super::{ExtractorError, MediaEntry};

/// Trait for media extraction tools.
///
/// Implementations build the download command rather than running it, so the
/// caller owns the process (registration, cancellation, timeouts).
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Extension (without dot) of the files produced by a download.
    fn audio_format(&self) -> &str;

    /// URL the tool is pointed at for `identifier`.
    fn target_url(&self, identifier: &str) -> String;

    /// Command that downloads `identifier` into `cwd` as
    /// `<identifier>-<title>.<audio_format>`. Stdio is left to the caller.
    fn download_command(&self, identifier: &str, cwd: &Path) -> Command;

    /// Fetch metadata for a single item or a playlist.
    async fn extract_info(&self, url: &str) -> Result<Vec<MediaEntry>, ExtractorError>;

    /// Check that the tool is installed and runnable.
    async fn validate(&self) -> Result<(), ExtractorError>;
}
