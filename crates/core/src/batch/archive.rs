//! Zip archive spooled to disk.

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::BatchError;

/// Entries at or above this size need zip64 headers.
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

/// Writes a deflate-compressed zip file, one entry at a time.
///
/// Zip writing is blocking, so every operation hops onto the blocking pool
/// with the writer and hands it back afterwards.
pub struct ArchiveWriter {
    path: PathBuf,
    zip: Option<ZipWriter<File>>,
    entries: Vec<String>,
}

impl ArchiveWriter {
    /// Create (or truncate) the archive file at `path`.
    pub async fn create(path: PathBuf) -> Result<Self, BatchError> {
        let target = path.clone();
        let file = tokio::task::spawn_blocking(move || File::create(&target))
            .await
            .map_err(BatchError::archive)?
            .map_err(|e| BatchError::Archive(format!("{}: {}", path.display(), e)))?;

        Ok(Self {
            path,
            zip: Some(ZipWriter::new(file)),
            entries: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entry names written so far, in order.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Copy `source` into the archive as `name`. Returns the bytes read.
    pub async fn add_file(&mut self, source: &Path, name: &str) -> Result<u64, BatchError> {
        let source = source.to_path_buf();
        let entry = name.to_string();
        let written = self
            .with_zip(move |zip| {
                let file = File::open(&source)?;
                let size = file.metadata()?.len();
                let options = entry_options().large_file(size >= ZIP64_THRESHOLD);
                zip.start_file(entry, options)?;
                let copied = std::io::copy(&mut BufReader::new(file), zip)?;
                Ok(copied)
            })
            .await?;

        self.entries.push(name.to_string());
        Ok(written)
    }

    /// Add a text entry.
    pub async fn add_text(&mut self, name: &str, contents: String) -> Result<(), BatchError> {
        let entry = name.to_string();
        self.with_zip(move |zip| {
            zip.start_file(entry, entry_options())?;
            zip.write_all(contents.as_bytes())?;
            Ok(())
        })
        .await?;

        self.entries.push(name.to_string());
        Ok(())
    }

    /// Write the central directory and close the file. Returns the archive size.
    pub async fn finish(mut self) -> Result<u64, BatchError> {
        let mut zip = self
            .zip
            .take()
            .ok_or_else(|| BatchError::Archive("archive writer is closed".to_string()))?;

        tokio::task::spawn_blocking(move || {
            let mut file = zip.finish().map_err(BatchError::archive)?;
            file.flush().map_err(BatchError::archive)?;
            file.metadata().map(|m| m.len()).map_err(BatchError::archive)
        })
        .await
        .map_err(BatchError::archive)?
    }

    async fn with_zip<T, F>(&mut self, op: F) -> Result<T, BatchError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ZipWriter<File>) -> Result<T, zip::result::ZipError> + Send + 'static,
    {
        let mut zip = self
            .zip
            .take()
            .ok_or_else(|| BatchError::Archive("archive writer is closed".to_string()))?;

        let (zip, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut zip);
            (zip, result)
        })
        .await
        .map_err(BatchError::archive)?;

        self.zip = Some(zip);
        result.map_err(BatchError::archive)
    }
}

fn entry_options() -> FileOptions {
    FileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// Manifest listing failed identifiers, one `identifier: message` line each.
pub fn failure_manifest<'a, I>(failures: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut text = String::from("Failed IDs (not included in archive):\n");
    for (identifier, message) in failures {
        text.push_str(identifier);
        text.push_str(": ");
        text.push_str(message);
        text.push('\n');
    }
    text
}
