//! Progress line parsing.

use once_cell::sync::Lazy;
use regex_lite::Regex;

use super::ProgressEvent;

static PERCENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[download\]\s+(\d{1,3}(?:\.\d+)?)%").expect("valid percent regex")
});

static DESTINATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[download\]\s+Destination:\s*(.+)$").expect("valid destination regex")
});

static ALREADY_DOWNLOADED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[download\]\s+(.+?) has already been downloaded").expect("valid regex")
});

static POSTPROCESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[(?:ExtractAudio|ffmpeg|Merger|FixupM4a)\](?:\s+Destination:\s*(.+))?")
        .expect("valid postprocess regex")
});

static METADATA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[info\]\s+[^:]+:\s+Downloading").expect("valid metadata regex")
});

/// Parse one line of download output.
///
/// Returns `None` for lines that carry no progress information. Never fails:
/// unknown or malformed text is simply ignored.
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let line = line.trim();

    if let Some(caps) = PERCENT.captures(line) {
        let value: f32 = caps.get(1)?.as_str().parse().ok()?;
        return Some(ProgressEvent::Percent(value.clamp(0.0, 100.0)));
    }

    if let Some(caps) = DESTINATION.captures(line) {
        return Some(ProgressEvent::Destination(caps.get(1)?.as_str().trim().to_string()));
    }

    if let Some(caps) = ALREADY_DOWNLOADED.captures(line) {
        return Some(ProgressEvent::Destination(caps.get(1)?.as_str().trim().to_string()));
    }

    if let Some(caps) = POSTPROCESS.captures(line) {
        let destination = caps.get(1).map(|m| m.as_str().trim().to_string());
        return Some(ProgressEvent::Converting { destination });
    }

    if METADATA.is_match(line) {
        return Some(ProgressEvent::MetadataFetched);
    }

    None
}
