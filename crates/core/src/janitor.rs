//! Periodic cleanup of the shared temp directory and old progress records.
//!
//! Batches clean up after themselves; the janitor only catches what a crash
//! or a killed process left behind. Workspaces of batches that are still
//! live are never touched, however old they are.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::batch::LiveBatches;
use crate::config::JanitorConfig;
use crate::progress::ProgressStore;

/// How long `stop` waits for the loop to finish an in-progress sweep.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// What one sweep removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub files_removed: usize,
    pub dirs_removed: usize,
    pub records_evicted: usize,
    /// Old workspaces skipped because their batch is still running.
    pub live_skipped: usize,
}

/// Background sweeper for stale temp files.
pub struct Janitor {
    config: JanitorConfig,
    temp_dir: PathBuf,
    progress: ProgressStore,
    live: LiveBatches,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Janitor {
    pub fn new(
        config: JanitorConfig,
        temp_dir: PathBuf,
        progress: ProgressStore,
        live: LiveBatches,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            temp_dir,
            progress,
            live,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Spawn the sweep loop. Does nothing when disabled or already running.
    pub fn start(&self) {
        if !self.config.enabled {
            info!("Janitor disabled");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Janitor already running");
            return;
        }

        let running = Arc::clone(&self.running);
        let config = self.config.clone();
        let temp_dir = self.temp_dir.clone();
        let progress = self.progress.clone();
        let live = self.live.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            info!(
                temp_dir = %temp_dir.display(),
                interval_secs = config.interval_secs,
                "Janitor started"
            );
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Janitor received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_secs(config.interval_secs.max(1))) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        sweep(&config, &temp_dir, &progress, &live).await;
                    }
                }
            }
            info!("Janitor stopped");
        });
        *self.lock_handle() = Some(handle);
    }

    /// Stop the sweep loop and wait for it to exit.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());

        let Some(handle) = self.lock_handle().take() else {
            return;
        };
        match tokio::time::timeout(STOP_TIMEOUT, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Janitor task failed"),
            Err(_) => warn!("Janitor did not stop in time"),
        }
    }

    /// Run one sweep now.
    pub async fn sweep_once(&self) -> SweepReport {
        sweep(&self.config, &self.temp_dir, &self.progress, &self.live).await
    }

    fn lock_handle(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn sweep(
    config: &JanitorConfig,
    temp_dir: &Path,
    progress: &ProgressStore,
    live: &LiveBatches,
) -> SweepReport {
    let mut report = SweepReport::default();
    let max_age = Duration::from_secs(config.max_age_secs);
    let now = SystemTime::now();

    match tokio::fs::read_dir(temp_dir).await {
        Ok(mut entries) => loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Janitor failed to read temp dir entry");
                    break;
                }
            };

            let path = entry.path();
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            let age = meta
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < max_age {
                continue;
            }
            if meta.is_dir() && live.owns_workspace(&entry.file_name().to_string_lossy()) {
                debug!(path = %path.display(), "Janitor skipped live batch workspace");
                report.live_skipped += 1;
                continue;
            }

            let removed = if meta.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match removed {
                Ok(()) if meta.is_dir() => report.dirs_removed += 1,
                Ok(()) => report.files_removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Janitor failed to delete"),
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(temp_dir = %temp_dir.display(), error = %e, "Janitor cannot read temp dir"),
    }

    let retention = chrono::Duration::seconds(config.progress_retention_secs.min(i64::MAX as u64) as i64);
    report.records_evicted = progress.evict_finished_before(chrono::Utc::now() - retention);

    if report != SweepReport::default() {
        info!(
            files = report.files_removed,
            dirs = report.dirs_removed,
            records = report.records_evicted,
            live_skipped = report.live_skipped,
            "Janitor sweep finished"
        );
    }
    report
}
