use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::acquisition::TimeoutPolicy;
use crate::extractor::ExtractorConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub janitor: JanitorConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    4000
}

/// Settings for acquisition batches and single downloads.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AcquisitionConfig {
    /// Shared temp directory. Every batch gets its own workspace inside it.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Maximum concurrent extractor processes within one batch.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,

    /// Maximum concurrent single-item downloads across the service.
    #[serde(default = "default_single_concurrency")]
    pub single_concurrency: usize,

    /// Lower bound for a task deadline, in seconds.
    #[serde(default = "default_timeout_floor")]
    pub timeout_floor_secs: u64,

    /// Deadline budget granted per second of expected media duration.
    #[serde(default = "default_timeout_per_media_second")]
    pub timeout_ms_per_media_second: u64,

    /// Size of each chunk sent to the consumer of an archive stream.
    #[serde(default = "default_chunk_bytes")]
    pub stream_chunk_bytes: usize,

    /// File name of the produced archive.
    #[serde(default = "default_archive_name")]
    pub archive_name: String,

    /// Name of the failure manifest entry inside the archive.
    #[serde(default = "default_manifest_name")]
    pub manifest_name: String,

    /// Extensions swept from a batch workspace during cleanup.
    #[serde(default = "default_media_extensions")]
    pub media_extensions: Vec<String>,
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("mixtape")
}

fn default_batch_concurrency() -> usize {
    6
}

fn default_single_concurrency() -> usize {
    2
}

fn default_timeout_floor() -> u64 {
    60
}

fn default_timeout_per_media_second() -> u64 {
    2000
}

fn default_chunk_bytes() -> usize {
    64 * 1024
}

fn default_archive_name() -> String {
    "mp3s.zip".to_string()
}

fn default_manifest_name() -> String {
    "failures.txt".to_string()
}

fn default_media_extensions() -> Vec<String> {
    ["mp3", "part", "ytdl", "webm", "m4a", "zip"]
        .iter()
        .map(|e| e.to_string())
        .collect()
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            batch_concurrency: default_batch_concurrency(),
            single_concurrency: default_single_concurrency(),
            timeout_floor_secs: default_timeout_floor(),
            timeout_ms_per_media_second: default_timeout_per_media_second(),
            stream_chunk_bytes: default_chunk_bytes(),
            archive_name: default_archive_name(),
            manifest_name: default_manifest_name(),
            media_extensions: default_media_extensions(),
        }
    }
}

impl AcquisitionConfig {
    /// Sets the shared temp directory.
    pub fn with_temp_dir(mut self, temp_dir: PathBuf) -> Self {
        self.temp_dir = temp_dir;
        self
    }

    /// Sets the batch concurrency ceiling.
    pub fn with_batch_concurrency(mut self, concurrency: usize) -> Self {
        self.batch_concurrency = concurrency;
        self
    }

    /// Sets the timeout floor in seconds.
    pub fn with_timeout_floor(mut self, secs: u64) -> Self {
        self.timeout_floor_secs = secs;
        self
    }

    /// Timeout policy shared by single and batch downloads.
    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy::new(
            Duration::from_secs(self.timeout_floor_secs),
            Duration::from_millis(self.timeout_ms_per_media_second),
        )
    }
}

/// Periodic temp directory sweeping.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JanitorConfig {
    #[serde(default = "default_janitor_enabled")]
    pub enabled: bool,

    /// How often the sweep runs.
    #[serde(default = "default_janitor_interval")]
    pub interval_secs: u64,

    /// Entries in the temp directory older than this are deleted.
    #[serde(default = "default_janitor_max_age")]
    pub max_age_secs: u64,

    /// Finished progress records older than this are evicted.
    #[serde(default = "default_progress_retention")]
    pub progress_retention_secs: u64,
}

fn default_janitor_enabled() -> bool {
    true
}

fn default_janitor_interval() -> u64 {
    3600
}

fn default_janitor_max_age() -> u64 {
    3600
}

fn default_progress_retention() -> u64 {
    86400
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            enabled: default_janitor_enabled(),
            interval_secs: default_janitor_interval(),
            max_age_secs: default_janitor_max_age(),
            progress_retention_secs: default_progress_retention(),
        }
    }
}

/// Config view returned by the API.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub acquisition: SanitizedAcquisitionConfig,
    pub extractor: SanitizedExtractorConfig,
    pub janitor: JanitorConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedAcquisitionConfig {
    pub batch_concurrency: usize,
    pub single_concurrency: usize,
    pub timeout_floor_secs: u64,
    pub timeout_ms_per_media_second: u64,
    pub archive_name: String,
}

/// Extractor settings without the local program path.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedExtractorConfig {
    pub audio_format: String,
    pub url_template: String,
    pub info_timeout_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            acquisition: SanitizedAcquisitionConfig {
                batch_concurrency: config.acquisition.batch_concurrency,
                single_concurrency: config.acquisition.single_concurrency,
                timeout_floor_secs: config.acquisition.timeout_floor_secs,
                timeout_ms_per_media_second: config.acquisition.timeout_ms_per_media_second,
                archive_name: config.acquisition.archive_name.clone(),
            },
            extractor: SanitizedExtractorConfig {
                audio_format: config.extractor.audio_format.clone(),
                url_template: config.extractor.url_template.clone(),
                info_timeout_secs: config.extractor.info_timeout_secs,
            },
            janitor: config.janitor.clone(),
        }
    }
}
