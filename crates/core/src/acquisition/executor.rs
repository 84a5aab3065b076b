//! Runs the extraction tool for one identifier.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;

use super::{AcquisitionError, SettledResult};
use crate::batch::BatchContext;
use crate::extractor::{failure_reason, parse_progress_line, Extractor, ProgressEvent};
use crate::{metrics, process};
use crate::progress::{Phase, ProgressStore, ProgressUpdate};
use crate::sanitize::safe_stem;

/// Stderr lines kept for the failure message.
const STDERR_TAIL_LINES: usize = 20;

/// Grace period for reaping a killed child.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

enum Outcome {
    Exited(std::io::Result<(ExitStatus, String)>),
    TimedOut,
    Cancelled,
}

/// Executes acquisitions against an [`Extractor`], reporting into a [`ProgressStore`].
#[derive(Clone)]
pub struct TaskExecutor {
    extractor: Arc<dyn Extractor>,
    progress: ProgressStore,
}

impl TaskExecutor {
    pub fn new(extractor: Arc<dyn Extractor>, progress: ProgressStore) -> Self {
        Self {
            extractor,
            progress,
        }
    }

    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    /// Acquire `identifier` inside `ctx`, giving up after `timeout`.
    ///
    /// Never fails: every outcome, including cancellation, is a [`SettledResult`].
    pub async fn run(
        &self,
        identifier: &str,
        timeout: Duration,
        ctx: &BatchContext,
    ) -> SettledResult {
        let start = Instant::now();
        let result = self.acquire(identifier, timeout, ctx).await;
        let elapsed = start.elapsed().as_secs_f64();

        match result {
            Ok((file_path, title)) => {
                let file_name = file_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let mut update = ProgressUpdate::phase(Phase::Finished)
                    .with_percent(100.0)
                    .with_file_name(file_name)
                    .finished_now();
                if !title.is_empty() {
                    update = update.with_title(title.clone());
                }
                self.progress.update(identifier, update);

                let entry_name = format!("{}.{}", safe_stem(&title), self.extractor.audio_format());
                tracing::debug!(
                    batch_id = %ctx.id(),
                    identifier = %identifier,
                    entry = %entry_name,
                    elapsed_secs = elapsed,
                    "Acquisition succeeded"
                );
                metrics::ACQUISITIONS_TOTAL
                    .with_label_values(&["success"])
                    .inc();
                metrics::ACQUISITION_DURATION_SECONDS
                    .with_label_values(&["success"])
                    .observe(elapsed);

                SettledResult::Success {
                    identifier: identifier.to_string(),
                    file_path,
                    entry_name,
                    title: (!title.is_empty()).then_some(title),
                }
            }
            Err(error) => {
                self.progress.update(
                    identifier,
                    ProgressUpdate::phase(Phase::Error)
                        .with_error(error.to_string())
                        .finished_now(),
                );
                tracing::debug!(
                    batch_id = %ctx.id(),
                    identifier = %identifier,
                    error = %error,
                    elapsed_secs = elapsed,
                    "Acquisition failed"
                );
                metrics::ACQUISITIONS_TOTAL
                    .with_label_values(&[error.kind()])
                    .inc();
                metrics::ACQUISITION_DURATION_SECONDS
                    .with_label_values(&[error.kind()])
                    .observe(elapsed);

                SettledResult::Failure {
                    identifier: identifier.to_string(),
                    error,
                }
            }
        }
    }

    /// Remove stale output for `identifier` from `dir`. Missing files or a
    /// missing directory are not an error.
    pub async fn preclean(&self, identifier: &str, dir: &Path) -> std::io::Result<usize> {
        let prefix = format!("{}-", identifier);
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(&prefix) {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        if removed > 0 {
            tracing::debug!(identifier = %identifier, removed, "Removed stale output");
        }
        Ok(removed)
    }

    async fn acquire(
        &self,
        identifier: &str,
        timeout: Duration,
        ctx: &BatchContext,
    ) -> Result<(PathBuf, String), AcquisitionError> {
        let dir = ctx.create_task_dir().await?;
        self.preclean(identifier, &dir).await?;

        self.progress.update(
            identifier,
            ProgressUpdate::phase(Phase::Starting)
                .with_percent(0.0)
                .started_now(),
        );

        let mut cmd = self.extractor.download_command(identifier, &dir);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        process::isolate(&mut cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| AcquisitionError::Spawn(e.to_string()))?;

        let Some((guard, mut kill_signal)) = ctx.register_process(identifier, child.id()) else {
            // The batch already reached a terminal state
            reap(&mut child, identifier).await;
            return Err(AcquisitionError::Cancelled);
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            reap(&mut child, identifier).await;
            return Err(AcquisitionError::Io("extractor output not captured".to_string()));
        };

        let outcome = tokio::select! {
            _ = &mut kill_signal => Outcome::Cancelled,
            _ = tokio::time::sleep(timeout) => Outcome::TimedOut,
            exited = drive(&mut child, stdout, stderr, identifier, &self.progress) => Outcome::Exited(exited),
        };

        if let Outcome::Exited(Ok(_)) = outcome {
            // Reaped; its pid must not be signalled anymore
            guard.release();
        }

        match outcome {
            Outcome::Cancelled => {
                reap(&mut child, identifier).await;
                Err(AcquisitionError::Cancelled)
            }
            Outcome::TimedOut => {
                tracing::warn!(
                    identifier = %identifier,
                    timeout_secs = timeout.as_secs_f64(),
                    "Extractor timed out, killing"
                );
                reap(&mut child, identifier).await;
                Err(AcquisitionError::Timeout {
                    secs: timeout.as_secs_f64(),
                })
            }
            Outcome::Exited(Err(e)) => {
                reap(&mut child, identifier).await;
                Err(e.into())
            }
            Outcome::Exited(Ok((status, stderr_tail))) => {
                if !status.success() {
                    return Err(AcquisitionError::Extraction {
                        message: failure_reason(&stderr_tail, status.code()),
                        exit_code: status.code(),
                    });
                }

                find_output(&dir, identifier, self.extractor.audio_format())
                    .await?
                    .ok_or(AcquisitionError::OutputMissing)
            }
        }
    }
}

/// Read both pipes to the end, then wait for the exit status.
async fn drive<O, E>(
    child: &mut Child,
    stdout: O,
    stderr: E,
    identifier: &str,
    progress: &ProgressStore,
) -> std::io::Result<(ExitStatus, String)>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut converting = false;
    let out = for_each_line(stdout, |line| {
        let Some(event) = parse_progress_line(line) else {
            return;
        };
        let update = match event {
            ProgressEvent::MetadataFetched => ProgressUpdate::phase(Phase::FetchedMetadata),
            ProgressEvent::Percent(percent) if converting => {
                ProgressUpdate::default().with_percent(percent)
            }
            ProgressEvent::Percent(percent) => {
                ProgressUpdate::phase(Phase::Downloading).with_percent(percent)
            }
            ProgressEvent::Destination(name) if converting => {
                ProgressUpdate::default().with_file_name(name)
            }
            ProgressEvent::Destination(name) => {
                ProgressUpdate::phase(Phase::Downloading).with_file_name(name)
            }
            ProgressEvent::Converting { destination } => {
                converting = true;
                let update = ProgressUpdate::phase(Phase::Converting);
                match destination {
                    Some(name) => update.with_file_name(name),
                    None => update,
                }
            }
        };
        progress.update(identifier, update);
    });

    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let err = for_each_line(stderr, |line| {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line.to_string());
    });

    let (out, err) = tokio::join!(out, err);
    out?;
    err?;

    let status = child.wait().await?;
    Ok((status, Vec::from(tail).join("\n")))
}

/// Feed every line of `reader` to `f`. Invalid UTF-8 is replaced rather than
/// aborting the read, so the pipe is always drained.
async fn for_each_line<R, F>(reader: R, mut f: F) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&buf);
        for part in text.trim_end_matches(['\r', '\n']).split('\r') {
            f(part);
        }
    }
}

/// Kill a child's whole process group and reap the child, ignoring
/// failures on an already-dead process.
async fn reap(child: &mut Child, identifier: &str) {
    if let Some(pid) = child.id() {
        process::kill_group(pid);
    }
    if let Err(e) = child.start_kill() {
        tracing::debug!(identifier = %identifier, error = %e, "Kill failed");
    }
    if tokio::time::timeout(REAP_TIMEOUT, child.wait()).await.is_err() {
        tracing::warn!(identifier = %identifier, "Killed extractor did not exit in time");
    }
}

/// Find the file the tool produced for `identifier` in `dir`: a regular
/// file named `<identifier>-<title>.<ext>`. Returns its path and title.
pub async fn find_output(
    dir: &Path,
    identifier: &str,
    ext: &str,
) -> std::io::Result<Option<(PathBuf, String)>> {
    let prefix = format!("{}-", identifier);
    let suffix = format!(".{}", ext);

    let mut matches = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.len() < prefix.len() + suffix.len()
            || !name.starts_with(&prefix)
            || !name.ends_with(&suffix)
        {
            continue;
        }
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let title = name[prefix.len()..name.len() - suffix.len()].to_string();
        matches.push((entry.path(), title));
    }

    matches.sort();
    Ok(matches.into_iter().next())
}
