//! Extractor module wrapping the external media extraction tool.
//!
//! The tool is treated as an opaque subprocess:
//! - `extract-info` mode prints JSON (one object, or newline-delimited objects)
//! - `download-audio` mode prints free-text progress lines and writes a media
//!   file into its working directory
//!
//! Progress text is turned into structured [`ProgressEvent`]s by
//! [`parse_progress_line`], which is independent of process management.
//!
//! # Example
//!
//! ```ignore
//! use mixtape_core::extractor::{Extractor, ExtractorConfig, YtDlpExtractor};
//!
//! let extractor = YtDlpExtractor::new(ExtractorConfig::default());
//! extractor.validate().await?;
//!
//! let entries = extractor.extract_info("https://www.youtube.com/playlist?list=PL123").await?;
//! for entry in entries {
//!     println!("{} ({:?}s)", entry.id, entry.duration);
//! }
//! ```

mod config;
mod error;
mod parser;
mod traits;
mod types;
mod ytdlp;

pub use config::ExtractorConfig;
pub use error::{failure_reason, ExtractorError};
pub use parser::parse_progress_line;
pub use traits::Extractor;
pub use types::{MediaEntry, ProgressEvent};
pub use ytdlp::{output_pattern, parse_info_output, YtDlpExtractor};
