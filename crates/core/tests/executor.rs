//! Single-identifier acquisition against the scripted extractor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use mixtape_core::acquisition::{AcquisitionError, SettledResult, TaskExecutor};
use mixtape_core::batch::{BatchContext, LiveBatches};
use mixtape_core::extractor::YtDlpExtractor;
use mixtape_core::testing::FakeExtractor;
use mixtape_core::{Config, Phase, ProgressStore};

struct Harness {
    executor: TaskExecutor,
    progress: ProgressStore,
    config: Config,
    _temp: TempDir,
}

impl Harness {
    fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let config = FakeExtractor::test_config(temp.path()).expect("Failed to install extractor");
        let progress = ProgressStore::new();
        let extractor = Arc::new(YtDlpExtractor::new(config.extractor.clone()));
        let executor = TaskExecutor::new(extractor, progress.clone());
        Self {
            executor,
            progress,
            config,
            _temp: temp,
        }
    }

    async fn context(&self) -> Arc<BatchContext> {
        BatchContext::create(
            &self.config.acquisition.temp_dir,
            self.config.acquisition.media_extensions.clone(),
            &LiveBatches::new(),
        )
        .await
        .expect("Failed to create batch context")
    }
}

#[tokio::test]
async fn test_successful_acquisition() {
    let harness = Harness::new();
    let ctx = harness.context().await;

    let result = harness
        .executor
        .run("abc", Duration::from_secs(10), &ctx)
        .await;

    match result {
        SettledResult::Success {
            identifier,
            file_path,
            entry_name,
            title,
        } => {
            assert_eq!(identifier, "abc");
            assert_eq!(entry_name, "track-abc.mp3");
            assert_eq!(title.as_deref(), Some("Track abc"));
            assert!(file_path.starts_with(ctx.workspace()));
            let body = std::fs::read_to_string(&file_path).unwrap();
            assert_eq!(body, "FAKEAUDIO abc\n");
        }
        other => panic!("expected success, got {:?}", other),
    }

    let record = harness.progress.read("abc").expect("progress recorded");
    assert_eq!(record.phase, Phase::Finished);
    assert_eq!(record.percent, 100.0);
    assert_eq!(record.file_name.as_deref(), Some("abc-Track abc.mp3"));
    assert!(record.started_at.is_some());
    assert!(record.finished_at.is_some());
    assert!(record.error.is_none());
    assert_eq!(ctx.active_processes(), 0);

    ctx.finish(mixtape_core::BatchState::Completed).await;
    assert!(!ctx.workspace().exists());
}

#[tokio::test]
async fn test_extraction_failure_reports_last_error_line() {
    let harness = Harness::new();
    let ctx = harness.context().await;

    let result = harness
        .executor
        .run("failing", Duration::from_secs(10), &ctx)
        .await;

    assert!(!result.is_success());
    assert_eq!(
        result.error(),
        Some(&AcquisitionError::Extraction {
            message: "not found".to_string(),
            exit_code: Some(1),
        })
    );
    assert_eq!(result.error().map(|e| e.to_string()).as_deref(), Some("not found"));

    let record = harness.progress.read("failing").unwrap();
    assert_eq!(record.phase, Phase::Error);
    assert_eq!(record.error.as_deref(), Some("not found"));
}

#[tokio::test]
async fn test_missing_output() {
    let harness = Harness::new();
    let ctx = harness.context().await;

    let result = harness
        .executor
        .run("missing1", Duration::from_secs(10), &ctx)
        .await;

    assert_eq!(result.error(), Some(&AcquisitionError::OutputMissing));
    assert_eq!(
        harness.progress.read("missing1").unwrap().error.as_deref(),
        Some("output not found")
    );
}

#[tokio::test]
async fn test_timeout_kills_extractor_helpers() {
    let harness = Harness::new();
    let ctx = harness.context().await;

    let result = harness
        .executor
        .run("forks1", Duration::from_secs(1), &ctx)
        .await;
    assert!(matches!(
        result.error(),
        Some(AcquisitionError::Timeout { .. })
    ));

    let helper = FakeExtractor::helper_pid(&harness.config, "forks1").expect("helper started");
    let mut gone = false;
    for _ in 0..100 {
        let stat = std::fs::read_to_string(format!("/proc/{}/stat", helper));
        // A zombie is dead, only not yet reaped by its new parent
        if stat.map_or(true, |s| s.rsplit(')').next().unwrap_or("").trim_start().starts_with('Z')) {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(gone, "helper {} outlived the extractor", helper);
}

#[tokio::test]
async fn test_timeout_kills_extractor() {
    let harness = Harness::new();
    let ctx = harness.context().await;

    let start = Instant::now();
    let result = harness
        .executor
        .run("slow1", Duration::from_millis(500), &ctx)
        .await;

    assert!(start.elapsed() < Duration::from_secs(10));
    assert!(matches!(
        result.error(),
        Some(AcquisitionError::Timeout { .. })
    ));
    assert_eq!(ctx.active_processes(), 0);
    assert_eq!(
        harness.progress.read("slow1").unwrap().phase,
        Phase::Error
    );
}

#[tokio::test]
async fn test_settled_batch_refuses_new_processes() {
    let harness = Harness::new();
    let ctx = harness.context().await;
    ctx.settle(mixtape_core::BatchState::Aborted);

    let result = harness
        .executor
        .run("abc", Duration::from_secs(10), &ctx)
        .await;

    assert_eq!(result.error(), Some(&AcquisitionError::Cancelled));
    ctx.cleanup().await;
}

#[tokio::test]
async fn test_preclean_is_idempotent() {
    let harness = Harness::new();
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("abc-Old Title.mp3"), b"old").unwrap();
    std::fs::write(temp.path().join("abc-Old Title.webm.part"), b"old").unwrap();
    std::fs::write(temp.path().join("abcd-Other.mp3"), b"keep").unwrap();

    let removed = harness.executor.preclean("abc", temp.path()).await.unwrap();
    assert_eq!(removed, 2);
    assert_eq!(harness.executor.preclean("abc", temp.path()).await.unwrap(), 0);
    assert!(temp.path().join("abcd-Other.mp3").exists());

    // A missing directory is fine too
    let gone = temp.path().join("gone");
    assert_eq!(harness.executor.preclean("abc", &gone).await.unwrap(), 0);
}
