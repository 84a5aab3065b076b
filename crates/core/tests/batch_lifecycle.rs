//! Batch lifecycle integration tests.
//!
//! These drive whole batches through the service with the scripted
//! extractor: archive contents, failure manifests, name collisions,
//! timeouts, consumer aborts and the janitor running next to live batches.

use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tempfile::TempDir;

use mixtape_core::acquisition::AcquisitionRequest;
use mixtape_core::testing::FakeExtractor;
use mixtape_core::config::JanitorConfig;
use mixtape_core::{AcquisitionService, BatchError, BatchState, Config, Janitor, Phase};

struct TestHarness {
    service: AcquisitionService,
    _temp: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_config(|_| {})
    }

    fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let mut config = FakeExtractor::test_config(temp.path()).expect("Failed to install extractor");
        tweak(&mut config);
        Self {
            service: AcquisitionService::new(config),
            _temp: temp,
        }
    }

    fn work_dir(&self) -> &Path {
        &self.service.config().acquisition.temp_dir
    }

    /// Wait until every `forks*` identifier has started its helper child.
    async fn helper_pids(&self, ids: &[&str]) -> Vec<u32> {
        for _ in 0..100 {
            let pids: Vec<u32> = ids
                .iter()
                .filter_map(|id| FakeExtractor::helper_pid(self.service.config(), id))
                .collect();
            if pids.len() == ids.len() {
                return pids;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("helper processes for {:?} never started", ids);
    }
}

fn requests(ids: &[&str]) -> Vec<AcquisitionRequest> {
    ids.iter().map(|id| AcquisitionRequest::new(*id)).collect()
}

/// Archive entry names and contents, in archive order.
fn read_archive(bytes: Vec<u8>) -> Vec<(String, String)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).expect("valid zip");
    (0..archive.len())
        .map(|i| {
            let mut file = archive.by_index(i).unwrap();
            let mut contents = String::new();
            file.read_to_string(&mut contents).unwrap();
            (file.name().to_string(), contents)
        })
        .collect()
}

fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}

fn process_gone(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Err(_) => true,
        // Field 3 is the state; a zombie is dead but not yet reaped
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .map(|rest| rest.trim_start().starts_with('Z'))
            .unwrap_or(false),
    }
}

/// Dead processes can take a moment to disappear after SIGKILL.
async fn wait_gone(pid: u32) -> bool {
    for _ in 0..100 {
        if process_gone(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_mixed_batch_includes_manifest() {
    let harness = TestHarness::new();

    let download = harness
        .service
        .download_batch(requests(&["a", "fail-b"]))
        .await
        .unwrap();
    assert_eq!(download.content_type(), "application/zip");
    assert_eq!(download.file_name(), "mp3s.zip");

    let (body, outcome) = download.collect().await;
    let report = outcome.unwrap();

    let entries = read_archive(body);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].0, "track-a.mp3");
    assert_eq!(entries[0].1, "FAKEAUDIO a\n");
    assert_eq!(entries[1].0, "failures.txt");
    assert_eq!(
        entries[1].1,
        "Failed IDs (not included in archive):\nfail-b: not found\n"
    );

    assert_eq!(report.entries, vec!["track-a.mp3".to_string()]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].identifier, "fail-b");
    assert!(report.bytes_streamed > 0);

    assert!(is_empty_dir(harness.work_dir()));
    assert_eq!(harness.service.progress("a").unwrap().phase, Phase::Finished);
    assert_eq!(harness.service.progress("fail-b").unwrap().phase, Phase::Error);
}

#[tokio::test]
async fn test_all_failed_batch_contains_only_manifest() {
    let harness = TestHarness::new();

    let download = harness
        .service
        .download_batch(requests(&["fail1", "fail2"]))
        .await
        .unwrap();
    let (body, outcome) = download.collect().await;
    let report = outcome.unwrap();

    let entries = read_archive(body);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, "failures.txt");
    assert!(entries[0].1.contains("fail1: not found\n"));
    assert!(entries[0].1.contains("fail2: not found\n"));
    assert!(report.entries.is_empty());
    assert!(is_empty_dir(harness.work_dir()));
}

#[tokio::test]
async fn test_colliding_titles_get_suffixes() {
    let harness = TestHarness::new();

    let download = harness
        .service
        .download_batch(requests(&["dup1", "dup2"]))
        .await
        .unwrap();
    let (body, outcome) = download.collect().await;
    outcome.unwrap();

    let mut names: Vec<String> = read_archive(body).into_iter().map(|(name, _)| name).collect();
    names.sort();
    assert_eq!(names, vec!["same-song.mp3", "same-song_1.mp3"]);
}

#[tokio::test]
async fn test_duplicate_identifiers_acquired_once() {
    let harness = TestHarness::new();

    let download = harness
        .service
        .download_batch(requests(&["a", "a", "b"]))
        .await
        .unwrap();
    let (body, outcome) = download.collect().await;
    let report = outcome.unwrap();

    assert_eq!(report.entries.len(), 2);
    assert_eq!(read_archive(body).len(), 2);
}

#[tokio::test]
async fn test_empty_batch_yields_empty_archive() {
    let harness = TestHarness::new();

    let download = harness.service.download_batch(Vec::new()).await.unwrap();
    let (body, outcome) = download.collect().await;
    let report = outcome.unwrap();

    assert!(read_archive(body).is_empty());
    assert!(report.entries.is_empty());
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn test_slow_task_times_out_without_blocking_others() {
    let harness = TestHarness::with_config(|config| {
        config.acquisition.timeout_floor_secs = 2;
    });

    let download = harness
        .service
        .download_batch(requests(&["a", "b", "slow3", "d", "e"]))
        .await
        .unwrap();
    let (body, outcome) = tokio::time::timeout(Duration::from_secs(20), download.collect())
        .await
        .expect("batch should finish well before the slow task would");
    let report = outcome.unwrap();

    assert_eq!(report.entries.len() + report.failures.len(), 5);
    assert_eq!(report.entries.len(), 4);
    assert_eq!(report.failures[0].identifier, "slow3");
    assert_eq!(report.failures[0].error, "timed out after 2s");

    let entries = read_archive(body);
    assert_eq!(entries.len(), 5);
    assert!(entries.iter().any(|(name, _)| name == "failures.txt"));
    assert!(is_empty_dir(harness.work_dir()));
}

#[tokio::test]
async fn test_consumer_abort_kills_processes_and_cleans_up() {
    let harness = TestHarness::new();

    let download = harness
        .service
        .download_batch(requests(&["slow1", "slow2", "a"]))
        .await
        .unwrap();
    let ctx = Arc::clone(download.context());

    // Wait until both slow extractors are running
    let mut pids = Vec::new();
    for _ in 0..100 {
        pids = ctx.process_ids();
        if pids.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(pids.len(), 2, "both slow tasks should be running");

    let (stream, outcome) = download.into_parts();
    drop(stream);

    let result = tokio::time::timeout(Duration::from_secs(15), outcome.wait())
        .await
        .expect("abort should settle quickly");
    assert_eq!(result, Err(BatchError::AbortedByConsumer));

    assert_eq!(ctx.state(), BatchState::Aborted);
    assert!(ctx.is_cleaned());
    assert_eq!(ctx.active_processes(), 0);
    assert!(!ctx.workspace().exists());
    for pid in pids {
        assert!(process_gone(pid), "process {} still alive", pid);
    }
}

#[tokio::test]
async fn test_stream_delivers_chunks_in_order() {
    let harness = TestHarness::with_config(|config| {
        config.acquisition.stream_chunk_bytes = 16;
    });

    let download = harness
        .service
        .download_batch(requests(&["a", "b"]))
        .await
        .unwrap();
    let (mut stream, outcome) = download.into_parts();

    let mut body = Vec::new();
    let mut chunks = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.unwrap();
        assert!(chunk.len() <= 16);
        body.extend_from_slice(&chunk);
        chunks += 1;
    }
    let report = outcome.wait().await.unwrap();

    assert!(chunks > 1);
    assert_eq!(report.bytes_streamed, body.len() as u64);
    assert_eq!(read_archive(body).len(), 2);
}

#[tokio::test]
async fn test_consumer_abort_kills_helper_processes() {
    let harness = TestHarness::new();

    let download = harness
        .service
        .download_batch(requests(&["forks1", "forks2"]))
        .await
        .unwrap();
    let ctx = Arc::clone(download.context());
    let helpers = harness.helper_pids(&["forks1", "forks2"]).await;

    let (stream, outcome) = download.into_parts();
    drop(stream);

    let result = tokio::time::timeout(Duration::from_secs(15), outcome.wait())
        .await
        .expect("abort should settle quickly");
    assert_eq!(result, Err(BatchError::AbortedByConsumer));
    assert_eq!(ctx.state(), BatchState::Aborted);
    assert!(!ctx.workspace().exists());

    for pid in helpers {
        assert!(wait_gone(pid).await, "helper {} outlived the batch", pid);
    }
}

#[tokio::test]
async fn test_timeout_kills_helper_processes() {
    let harness = TestHarness::with_config(|config| {
        config.acquisition.timeout_floor_secs = 2;
    });

    let download = harness
        .service
        .download_batch(requests(&["forks-t", "a"]))
        .await
        .unwrap();
    let helper = harness.helper_pids(&["forks-t"]).await;

    let (body, outcome) = tokio::time::timeout(Duration::from_secs(20), download.collect())
        .await
        .expect("timeout should end the helper's task");
    let report = outcome.unwrap();

    assert_eq!(report.entries, vec!["track-a.mp3".to_string()]);
    assert_eq!(report.failures[0].identifier, "forks-t");
    assert_eq!(report.failures[0].error, "timed out after 2s");
    assert_eq!(read_archive(body).len(), 2);
    assert!(wait_gone(helper[0]).await, "helper {} outlived its timeout", helper[0]);
}

#[tokio::test]
async fn test_consumer_abort_while_streaming_archive() {
    let harness = TestHarness::with_config(|config| {
        config.acquisition.stream_chunk_bytes = 8;
    });

    let download = harness
        .service
        .download_batch(requests(&["a", "b"]))
        .await
        .unwrap();
    let ctx = Arc::clone(download.context());
    let (mut stream, outcome) = download.into_parts();

    // The first chunk only arrives once the archive is finalized
    let first = stream.next().await.expect("archive bytes").unwrap();
    assert!(first.len() <= 8);
    drop(stream);

    let result = tokio::time::timeout(Duration::from_secs(15), outcome.wait())
        .await
        .expect("abort should settle quickly");
    assert_eq!(result, Err(BatchError::AbortedByConsumer));

    assert_eq!(ctx.state(), BatchState::Aborted);
    assert!(ctx.is_cleaned());
    assert!(!ctx.workspace().exists());
    assert!(is_empty_dir(harness.work_dir()));
    assert!(harness.service.live_batches().is_empty());
}

#[tokio::test]
async fn test_janitor_spares_running_batch() {
    let harness = TestHarness::new();

    let download = harness
        .service
        .download_batch(requests(&["slow1"]))
        .await
        .unwrap();
    let ctx = Arc::clone(download.context());
    for _ in 0..100 {
        if ctx.active_processes() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(ctx.active_processes(), 1, "slow task should be running");

    // A zero max age makes every entry stale
    let janitor = Janitor::new(
        JanitorConfig {
            enabled: true,
            interval_secs: 3600,
            max_age_secs: 0,
            progress_retention_secs: 3600,
        },
        harness.work_dir().to_path_buf(),
        harness.service.progress_store().clone(),
        harness.service.live_batches().clone(),
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    let report = janitor.sweep_once().await;

    assert_eq!(report.dirs_removed, 0);
    assert_eq!(report.live_skipped, 1);
    assert!(ctx.workspace().exists());
    assert_eq!(ctx.state(), BatchState::Running);

    let (stream, outcome) = download.into_parts();
    drop(stream);
    assert_eq!(outcome.wait().await, Err(BatchError::AbortedByConsumer));
    assert!(harness.service.live_batches().is_empty());
    assert!(!ctx.workspace().exists());
}
