//! yt-dlp based extractor implementation.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use super::config::ExtractorConfig;
use super::error::ExtractorError;
use super::traits::Extractor;
use super::types::MediaEntry;

/// Output template handed to the tool. Produced files always start with
/// `<identifier>-`, which is how the executor finds them afterwards.
pub fn output_pattern(identifier: &str) -> String {
    format!("{}-%(title)s.%(ext)s", identifier)
}

/// yt-dlp based extractor.
pub struct YtDlpExtractor {
    config: ExtractorConfig,
}

impl YtDlpExtractor {
    /// Creates a new extractor with the given configuration.
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    /// Creates an extractor with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ExtractorConfig::default())
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.program_args);
        cmd
    }

    /// Builds arguments for a download-audio run.
    fn build_download_args(&self, identifier: &str) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            "bestaudio".to_string(),
            "-x".to_string(),
            "--audio-format".to_string(),
            self.config.audio_format.clone(),
            // One progress update per line instead of carriage returns
            "--newline".to_string(),
            "-o".to_string(),
            output_pattern(identifier),
        ];

        args.extend(self.config.extra_args.iter().cloned());
        args.push(self.target_url(identifier));

        args
    }

    fn build_info_args(url: &str) -> Vec<String> {
        vec![
            "--dump-json".to_string(),
            "--flat-playlist".to_string(),
            url.to_string(),
        ]
    }
}

#[derive(Debug, Deserialize)]
struct InfoJson {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    entries: Option<Vec<InfoJson>>,
}

impl InfoJson {
    fn into_entry(self) -> Option<MediaEntry> {
        Some(MediaEntry {
            id: self.id?,
            title: self.title,
            duration: self.duration,
            thumbnail: self.thumbnail,
        })
    }
}

/// Parse `--dump-json` output.
///
/// Accepts a single JSON object, an object carrying an `entries` list, or
/// newline-delimited objects. Entries without an id are skipped.
pub fn parse_info_output(stdout: &str) -> Result<Vec<MediaEntry>, ExtractorError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(ExtractorError::unparseable("empty output"));
    }

    if let Ok(info) = serde_json::from_str::<InfoJson>(trimmed) {
        return Ok(match info.entries {
            Some(entries) => entries.into_iter().filter_map(InfoJson::into_entry).collect(),
            None => info.into_entry().into_iter().collect(),
        });
    }

    let mut entries = Vec::new();
    for (index, line) in trimmed.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let info: InfoJson = serde_json::from_str(line).map_err(|e| {
            ExtractorError::unparseable(format!("line {}: {}", index + 1, e))
        })?;
        entries.extend(info.into_entry());
    }

    Ok(entries)
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    fn audio_format(&self) -> &str {
        &self.config.audio_format
    }

    fn target_url(&self, identifier: &str) -> String {
        self.config
            .url_template
            .replace("{id}", &urlencoding::encode(identifier))
    }

    fn download_command(&self, identifier: &str, cwd: &Path) -> Command {
        let mut cmd = self.base_command();
        cmd.args(self.build_download_args(identifier))
            .current_dir(cwd);
        cmd
    }

    async fn extract_info(&self, url: &str) -> Result<Vec<MediaEntry>, ExtractorError> {
        let mut cmd = self.base_command();
        cmd.args(Self::build_info_args(url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the output future on timeout must not leave the child behind
            .kill_on_drop(true);

        let timeout_secs = self.config.info_timeout_secs;
        let output = timeout(Duration::from_secs(timeout_secs), cmd.output())
            .await
            .map_err(|_| ExtractorError::Timeout { timeout_secs })?
            .map_err(|e| ExtractorError::from_spawn(e, &self.config.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractorError::failed(&stderr, output.status.code()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let entries = parse_info_output(&stdout)?;
        tracing::debug!(url = %url, count = entries.len(), "Extracted media info");
        Ok(entries)
    }

    async fn validate(&self) -> Result<(), ExtractorError> {
        let output = self
            .base_command()
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ExtractorError::from_spawn(e, &self.config.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractorError::failed(&stderr, output.status.code()));
        }

        Ok(())
    }
}
