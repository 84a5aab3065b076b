//! Entry point used by the HTTP layer: listing, single and batch downloads,
//! progress lookups.

use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::acquisition::{AcquisitionError, AcquisitionRequest, SettledResult, TaskExecutor};
use crate::batch::{
    spawn_delivery, stream_file, ArchiveAssembler, BatchContext, BatchDownload, BatchError,
    BatchReport, BatchState, LiveBatches,
};
use crate::config::Config;
use crate::extractor::{Extractor, ExtractorError, MediaEntry, YtDlpExtractor};
use crate::progress::{ProgressRecord, ProgressStore, ProgressUpdate};

/// Acquisition service shared by all requests.
#[derive(Clone)]
pub struct AcquisitionService {
    config: Arc<Config>,
    extractor: Arc<dyn Extractor>,
    progress: ProgressStore,
    executor: TaskExecutor,
    assembler: ArchiveAssembler,
    single_permits: Arc<Semaphore>,
    live: LiveBatches,
}

impl AcquisitionService {
    /// Build the service around the yt-dlp extractor described by `config`.
    pub fn new(config: Config) -> Self {
        let extractor: Arc<dyn Extractor> = Arc::new(YtDlpExtractor::new(config.extractor.clone()));
        Self::with_extractor(config, extractor)
    }

    /// Build the service around any extractor.
    pub fn with_extractor(config: Config, extractor: Arc<dyn Extractor>) -> Self {
        let progress = ProgressStore::new();
        let executor = TaskExecutor::new(Arc::clone(&extractor), progress.clone());
        let live = LiveBatches::new();
        let assembler =
            ArchiveAssembler::new(executor.clone(), config.acquisition.clone(), live.clone());
        let single_permits = Arc::new(Semaphore::new(config.acquisition.single_concurrency.max(1)));

        Self {
            config: Arc::new(config),
            extractor,
            progress,
            executor,
            assembler,
            single_permits,
            live,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn extractor(&self) -> &Arc<dyn Extractor> {
        &self.extractor
    }

    pub fn progress_store(&self) -> &ProgressStore {
        &self.progress
    }

    /// Batches (single downloads included) whose workspace is still in use.
    pub fn live_batches(&self) -> &LiveBatches {
        &self.live
    }

    /// Current progress of `identifier`, if it was ever requested.
    pub fn progress(&self, identifier: &str) -> Option<ProgressRecord> {
        self.progress.read(identifier)
    }

    /// List the media behind `url` (a single item or a playlist).
    pub async fn list(&self, url: &str) -> Result<Vec<MediaEntry>, ExtractorError> {
        self.extractor.extract_info(url).await
    }

    /// Acquire one identifier and stream the resulting file.
    ///
    /// Failures are returned directly instead of being bundled into an
    /// archive. The file is removed once the stream ends or is dropped.
    pub async fn download_one(
        &self,
        request: AcquisitionRequest,
    ) -> Result<BatchDownload, AcquisitionError> {
        let permit = Arc::clone(&self.single_permits)
            .acquire_owned()
            .await
            .map_err(|e| AcquisitionError::Internal(e.to_string()))?;

        let acquisition = &self.config.acquisition;
        let ctx = BatchContext::create(
            &acquisition.temp_dir,
            acquisition.media_extensions.clone(),
            &self.live,
        )
        .await
            .map_err(|e| AcquisitionError::Io(e.to_string()))?;

        let identifier = request.identifier.clone();
        self.progress.begin(&identifier);
        if request.duration_secs.is_some() {
            self.progress.update(
                &identifier,
                ProgressUpdate::default().with_duration(request.duration_secs),
            );
        }

        let timeout = self
            .assembler
            .timeout_policy()
            .for_duration(request.duration_secs);
        let settled = self.executor.run(&identifier, timeout, &ctx).await;
        drop(permit);

        let (file_path, entry_name) = match settled {
            SettledResult::Success {
                file_path,
                entry_name,
                ..
            } => (file_path, entry_name),
            SettledResult::Failure { error, .. } => {
                ctx.finish(BatchState::Failed).await;
                return Err(error);
            }
        };

        tracing::info!(batch_id = %ctx.id(), identifier = %identifier, file = %entry_name, "Streaming single download");

        let content_type = content_type_for(self.extractor.audio_format());
        let chunk_size = acquisition.stream_chunk_bytes;
        let batch_id = ctx.id();
        let file_name = entry_name.clone();

        Ok(spawn_delivery(ctx, entry_name, content_type, move |tx| async move {
            let bytes_streamed = stream_file(&file_path, chunk_size, &tx).await?;
            Ok::<_, BatchError>(BatchReport {
                batch_id,
                file_name: file_name.clone(),
                entries: vec![file_name],
                failures: Vec::new(),
                bytes_streamed,
            })
        }))
    }

    /// Acquire many identifiers into one archive.
    pub async fn download_batch(
        &self,
        requests: Vec<AcquisitionRequest>,
    ) -> Result<BatchDownload, BatchError> {
        self.assembler
            .assemble(requests, self.config.acquisition.batch_concurrency)
            .await
    }
}

/// MIME type for a produced media file.
pub fn content_type_for(audio_format: &str) -> &'static str {
    match audio_format.to_ascii_lowercase().as_str() {
        "mp3" => "audio/mpeg",
        "m4a" | "aac" => "audio/mp4",
        "opus" | "ogg" | "vorbis" => "audio/ogg",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}
