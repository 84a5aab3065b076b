//! Configuration for the extractor module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the yt-dlp based extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Program to launch.
    #[serde(default = "default_program")]
    pub program: PathBuf,

    /// Arguments placed before the generated ones (e.g. `["-m", "yt_dlp"]`).
    #[serde(default)]
    pub program_args: Vec<String>,

    /// Target URL for an identifier. `{id}` is replaced by the url-encoded identifier.
    #[serde(default = "default_url_template")]
    pub url_template: String,

    /// Audio format requested from the tool; also the extension of produced files.
    #[serde(default = "default_audio_format")]
    pub audio_format: String,

    /// Additional download arguments.
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Timeout for metadata extraction in seconds.
    #[serde(default = "default_info_timeout")]
    pub info_timeout_secs: u64,
}

fn default_program() -> PathBuf {
    PathBuf::from("yt-dlp")
}

fn default_url_template() -> String {
    "https://www.youtube.com/watch?v={id}".to_string()
}

fn default_audio_format() -> String {
    "mp3".to_string()
}

fn default_info_timeout() -> u64 {
    60
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            program_args: Vec::new(),
            url_template: default_url_template(),
            audio_format: default_audio_format(),
            extra_args: Vec::new(),
            info_timeout_secs: default_info_timeout(),
        }
    }
}

impl ExtractorConfig {
    /// Creates a config launching `program` with leading `program_args`.
    pub fn with_program(program: impl Into<PathBuf>, program_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            program_args,
            ..Default::default()
        }
    }

    /// Sets the URL template.
    pub fn with_url_template(mut self, template: impl Into<String>) -> Self {
        self.url_template = template.into();
        self
    }

    /// Sets the metadata timeout in seconds.
    pub fn with_info_timeout(mut self, secs: u64) -> Self {
        self.info_timeout_secs = secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ExtractorConfig::default();
        assert_eq!(config.program, PathBuf::from("yt-dlp"));
        assert!(config.program_args.is_empty());
        assert_eq!(config.audio_format, "mp3");
        assert_eq!(config.info_timeout_secs, 60);
    }

    #[test]
    fn test_config_builder() {
        let config = ExtractorConfig::with_program("python3", vec!["-m".into(), "yt_dlp".into()])
            .with_url_template("https://music.example/{id}")
            .with_info_timeout(5);

        assert_eq!(config.program, PathBuf::from("python3"));
        assert_eq!(config.program_args, vec!["-m", "yt_dlp"]);
        assert_eq!(config.url_template, "https://music.example/{id}");
        assert_eq!(config.info_timeout_secs, 5);
    }
}
