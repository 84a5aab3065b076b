//! Lifecycle and cleanup of one batch.

use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::sync::oneshot;
use uuid::Uuid;

use super::live::{LiveBatches, WORKSPACE_PREFIX};
use super::BatchError;
use crate::{metrics, process};

/// Batch lifecycle. `Running` moves to exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Running,
    Completed,
    Failed,
    Aborted,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Running => "running",
            BatchState::Completed => "completed",
            BatchState::Failed => "failed",
            BatchState::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct TrackedProcess {
    identifier: String,
    pid: Option<u32>,
    /// Taken once the process has been told to die.
    kill: Option<oneshot::Sender<()>>,
}

/// Owns every subprocess and temp file created for one batch.
///
/// All files live under a private workspace `<temp_dir>/batch-<id>`, so
/// cleanup never touches another batch. The batch is listed in
/// [`LiveBatches`] until its cleanup has run. The first [`settle`](Self::settle)
/// decides the terminal state and kills registered processes; cleanup runs
/// at most once, either through [`cleanup`](Self::cleanup) or on drop.
pub struct BatchContext {
    id: Uuid,
    workspace: PathBuf,
    media_extensions: Vec<String>,
    next_task: AtomicU64,
    next_key: AtomicU64,
    processes: Mutex<HashMap<u64, TrackedProcess>>,
    artifacts: Mutex<Vec<PathBuf>>,
    terminal: OnceLock<BatchState>,
    cleaned: AtomicBool,
    live: LiveBatches,
}

impl BatchContext {
    /// Create the workspace for a new batch under `temp_dir`.
    pub async fn create(
        temp_dir: &Path,
        media_extensions: Vec<String>,
        live: &LiveBatches,
    ) -> Result<Arc<Self>, BatchError> {
        let id = Uuid::new_v4();
        let workspace = temp_dir.join(format!("{}{}", WORKSPACE_PREFIX, id));

        // Listed before the directory exists so a sweep never sees it unlisted
        live.enter(id);
        if let Err(e) = tokio::fs::create_dir_all(&workspace).await {
            live.leave(id);
            return Err(BatchError::Workspace(format!("{}: {}", workspace.display(), e)));
        }

        let media_extensions = media_extensions
            .into_iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .collect();

        tracing::debug!(batch_id = %id, workspace = %workspace.display(), "Batch workspace created");

        Ok(Arc::new(Self {
            id,
            workspace,
            media_extensions,
            next_task: AtomicU64::new(0),
            next_key: AtomicU64::new(0),
            processes: Mutex::new(HashMap::new()),
            artifacts: Mutex::new(Vec::new()),
            terminal: OnceLock::new(),
            cleaned: AtomicBool::new(false),
            live: live.clone(),
        }))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn state(&self) -> BatchState {
        self.terminal.get().copied().unwrap_or(BatchState::Running)
    }

    pub fn is_cleaned(&self) -> bool {
        self.cleaned.load(Ordering::SeqCst)
    }

    /// A fresh working directory for one task.
    pub async fn create_task_dir(&self) -> std::io::Result<PathBuf> {
        let n = self.next_task.fetch_add(1, Ordering::Relaxed);
        let dir = self.workspace.join(format!("task-{}", n));
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Track a running subprocess.
    ///
    /// Returns `None` when the batch has already settled; the caller must
    /// then kill the process itself. Otherwise the receiver fires when the
    /// batch wants the process gone, and dropping the guard deregisters it.
    pub fn register_process(
        &self,
        identifier: &str,
        pid: Option<u32>,
    ) -> Option<(ProcessGuard<'_>, oneshot::Receiver<()>)> {
        let mut processes = self.lock_processes();
        if self.terminal.get().is_some() {
            return None;
        }

        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        let (kill, kill_rx) = oneshot::channel();
        processes.insert(
            key,
            TrackedProcess {
                identifier: identifier.to_string(),
                pid,
                kill: Some(kill),
            },
        );
        metrics::SUBPROCESSES_ACTIVE.inc();

        Some((ProcessGuard { ctx: self, key }, kill_rx))
    }

    /// PIDs of the subprocesses currently registered.
    pub fn process_ids(&self) -> Vec<u32> {
        self.lock_processes()
            .values()
            .filter_map(|p| p.pid)
            .collect()
    }

    /// Subprocesses not yet deregistered. A killed process keeps counting
    /// until its task has reaped it and dropped the guard.
    pub fn active_processes(&self) -> usize {
        self.lock_processes().len()
    }

    /// Register a file to delete during cleanup, wherever it lives.
    pub fn track_artifact(&self, path: impl Into<PathBuf>) {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.into());
    }

    /// Kill the process group of every registered subprocess and tell its
    /// task to reap it. Returns how many were signalled; a process is only
    /// signalled once.
    ///
    /// The group is killed here rather than left to the task, since the
    /// task may be dropped without ever reaching its own kill path.
    pub fn terminate_processes(&self) -> usize {
        let mut processes = self.lock_processes();
        let mut count = 0;
        for process in processes.values_mut() {
            let Some(kill) = process.kill.take() else {
                continue;
            };
            count += 1;
            if let Some(pid) = process.pid {
                process::kill_group(pid);
            }
            // A send error means the task already finished
            if kill.send(()).is_err() {
                tracing::debug!(
                    batch_id = %self.id,
                    identifier = %process.identifier,
                    pid = ?process.pid,
                    "Process already gone"
                );
            }
        }
        drop(processes);
        if count > 0 {
            tracing::debug!(batch_id = %self.id, count, "Terminated batch subprocesses");
        }
        count
    }

    /// Move to `state` if still running, killing registered subprocesses.
    /// Only the first call wins; later ones return `false` and do nothing.
    pub fn settle(&self, state: BatchState) -> bool {
        if state == BatchState::Running || self.terminal.set(state).is_err() {
            return false;
        }

        self.terminate_processes();
        metrics::BATCHES_TOTAL
            .with_label_values(&[state.as_str()])
            .inc();

        match state {
            BatchState::Completed => tracing::info!(batch_id = %self.id, "Batch completed"),
            _ => tracing::warn!(batch_id = %self.id, state = %state, "Batch ended"),
        }
        true
    }

    /// Delete the batch's files and workspace. Runs once; later calls are no-ops.
    ///
    /// Callers must make sure no task still writes into the workspace.
    pub async fn cleanup(&self) {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return;
        }

        let workspace = self.workspace.clone();
        let extensions = self.media_extensions.clone();
        let artifacts = self.take_artifacts();
        let id = self.id;

        let swept = tokio::task::spawn_blocking(move || {
            sweep(id, &workspace, &extensions, &artifacts)
        })
        .await;

        match swept {
            Ok(removed) => {
                tracing::debug!(batch_id = %self.id, removed, "Batch workspace removed")
            }
            Err(e) => tracing::warn!(batch_id = %self.id, error = %e, "Cleanup task failed"),
        }
        self.live.leave(self.id);
    }

    /// Settle and clean up. Returns whether this call decided the terminal state.
    pub async fn finish(&self, state: BatchState) -> bool {
        let won = self.settle(state);
        self.cleanup().await;
        won
    }

    fn lock_processes(&self) -> MutexGuard<'_, HashMap<u64, TrackedProcess>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_artifacts(&self) -> Vec<PathBuf> {
        std::mem::take(&mut *self.artifacts.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Drop for BatchContext {
    fn drop(&mut self) {
        if self.terminal.get().is_none() {
            tracing::warn!(batch_id = %self.id, "Batch dropped while running");
            self.settle(BatchState::Aborted);
        }
        if !self.cleaned.swap(true, Ordering::SeqCst) {
            let artifacts = self.take_artifacts();
            sweep(self.id, &self.workspace, &self.media_extensions, &artifacts);
        }
        self.live.leave(self.id);
    }
}

/// Deregisters a subprocess when dropped.
pub struct ProcessGuard<'a> {
    ctx: &'a BatchContext,
    key: u64,
}

impl ProcessGuard<'_> {
    /// Deregister now. Call once the process has been reaped so a later
    /// batch kill never signals a recycled process group id.
    pub fn release(self) {}
}

impl Drop for ProcessGuard<'_> {
    fn drop(&mut self) {
        self.ctx.lock_processes().remove(&self.key);
        metrics::SUBPROCESSES_ACTIVE.dec();
    }
}

/// Remove media files under `workspace`, then registered artifacts, then the
/// workspace itself. Failures are logged and skipped.
fn sweep(batch_id: Uuid, workspace: &Path, extensions: &[String], artifacts: &[PathBuf]) -> usize {
    let mut removed = 0;
    let mut dirs = vec![workspace.to_path_buf()];

    while let Some(dir) = dirs.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                tracing::warn!(batch_id = %batch_id, dir = %dir.display(), error = %e, "Cannot scan directory");
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            match entry.file_type() {
                Ok(ft) if ft.is_dir() => dirs.push(path),
                Ok(_) if has_extension(&path, extensions) => {
                    if remove_file(batch_id, &path) {
                        removed += 1;
                    }
                }
                _ => {}
            }
        }
    }

    for artifact in artifacts {
        if remove_file(batch_id, artifact) {
            removed += 1;
        }
    }

    match std::fs::remove_dir_all(workspace) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            batch_id = %batch_id,
            workspace = %workspace.display(),
            error = %e,
            "Failed to remove batch workspace"
        ),
    }

    removed
}

fn remove_file(batch_id: Uuid, path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!(batch_id = %batch_id, path = %path.display(), error = %e, "Failed to delete temp file");
            false
        }
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| extensions.iter().any(|e| *e == ext))
}
