//! Batch orchestration: acquire many identifiers, zip the results, stream
//! the archive.

use std::collections::HashSet;
use std::sync::Arc;

use super::archive::{failure_manifest, ArchiveWriter};
use super::stream::{spawn_delivery, stream_file, ChunkSender, FailedItem};
use super::{BatchContext, BatchDownload, BatchError, BatchReport, BatchState, LiveBatches};
use crate::acquisition::{
    AcquisitionError, AcquisitionRequest, SettledResult, TaskExecutor, TimeoutPolicy,
};
use crate::config::AcquisitionConfig;
use crate::metrics;
use crate::pool::{PoolRun, TaskPool};
use crate::progress::ProgressUpdate;
use crate::sanitize::UsedNames;

/// Builds archives out of batches of identifiers.
#[derive(Clone)]
pub struct ArchiveAssembler {
    executor: TaskExecutor,
    config: AcquisitionConfig,
    timeout_policy: TimeoutPolicy,
    live: LiveBatches,
}

impl ArchiveAssembler {
    pub fn new(executor: TaskExecutor, config: AcquisitionConfig, live: LiveBatches) -> Self {
        let timeout_policy = config.timeout_policy();
        Self {
            executor,
            config,
            timeout_policy,
            live,
        }
    }

    /// Override the deadline policy derived from the config.
    pub fn with_timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout_policy = policy;
        self
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    pub fn timeout_policy(&self) -> TimeoutPolicy {
        self.timeout_policy
    }

    /// Start a batch. Returns as soon as the workspace exists; the archive
    /// is produced in the background and delivered through the returned
    /// stream.
    ///
    /// Duplicate identifiers are acquired once. Entries are added in the
    /// order tasks settle, not in request order.
    pub async fn assemble(
        &self,
        requests: Vec<AcquisitionRequest>,
        concurrency: usize,
    ) -> Result<BatchDownload, BatchError> {
        let requests = dedupe(requests);
        let ctx = BatchContext::create(
            &self.config.temp_dir,
            self.config.media_extensions.clone(),
            &self.live,
        )
        .await?;

        let progress = self.executor.progress();
        for request in &requests {
            progress.begin(&request.identifier);
            if request.duration_secs.is_some() {
                progress.update(
                    &request.identifier,
                    ProgressUpdate::default().with_duration(request.duration_secs),
                );
            }
        }

        tracing::info!(
            batch_id = %ctx.id(),
            count = requests.len(),
            concurrency,
            "Batch started"
        );

        let driver = BatchDriver {
            ctx: Arc::clone(&ctx),
            executor: self.executor.clone(),
            config: self.config.clone(),
            timeout_policy: self.timeout_policy,
            requests,
            concurrency,
        };

        Ok(spawn_delivery(
            ctx,
            self.config.archive_name.clone(),
            "application/zip",
            move |tx| driver.run(tx),
        ))
    }
}

/// Keep the first occurrence of each identifier.
fn dedupe(requests: Vec<AcquisitionRequest>) -> Vec<AcquisitionRequest> {
    let mut seen = HashSet::new();
    let total = requests.len();
    let unique: Vec<_> = requests
        .into_iter()
        .filter(|r| seen.insert(r.identifier.clone()))
        .collect();

    if unique.len() < total {
        tracing::debug!(dropped = total - unique.len(), "Dropped duplicate identifiers");
    }
    unique
}

enum Step {
    Disconnected,
    Settled(Option<(usize, Result<SettledResult, crate::pool::TaskFault>)>),
}

struct BatchDriver {
    ctx: Arc<BatchContext>,
    executor: TaskExecutor,
    config: AcquisitionConfig,
    timeout_policy: TimeoutPolicy,
    requests: Vec<AcquisitionRequest>,
    concurrency: usize,
}

impl BatchDriver {
    async fn run(self, tx: ChunkSender) -> Result<BatchReport, BatchError> {
        let mut archive =
            ArchiveWriter::create(self.ctx.workspace().join(&self.config.archive_name)).await?;
        self.ctx.track_artifact(archive.path());

        let identifiers: Vec<String> = self
            .requests
            .iter()
            .map(|r| r.identifier.clone())
            .collect();

        let tasks: Vec<_> = self
            .requests
            .iter()
            .map(|request| {
                let executor = self.executor.clone();
                let ctx = Arc::clone(&self.ctx);
                let identifier = request.identifier.clone();
                let timeout = self.timeout_policy.for_duration(request.duration_secs);
                move || async move { executor.run(&identifier, timeout, &ctx).await }
            })
            .collect();

        let mut run = TaskPool::new(self.concurrency).start(tasks);
        let collected = self
            .collect_results(&mut run, &tx, &mut archive, &identifiers)
            .await;

        let (entries, failures) = match collected {
            Ok(collected) => collected,
            Err(e) => {
                // Kill everything before the pool goes so nothing keeps writing
                let state = match e {
                    BatchError::AbortedByConsumer => BatchState::Aborted,
                    _ => BatchState::Failed,
                };
                self.ctx.settle(state);
                run.shutdown().await;
                return Err(e);
            }
        };
        run.shutdown().await;

        if !failures.is_empty() {
            let manifest = failure_manifest(
                failures
                    .iter()
                    .map(|f| (f.identifier.as_str(), f.error.as_str())),
            );
            archive
                .add_text(&self.config.manifest_name, manifest)
                .await?;
            tracing::info!(
                batch_id = %self.ctx.id(),
                failures = failures.len(),
                "Failure manifest appended"
            );
        }

        let archive_path = archive.path().to_path_buf();
        let archive_size = archive.finish().await?;
        tracing::info!(
            batch_id = %self.ctx.id(),
            entries = entries.len(),
            failures = failures.len(),
            bytes = archive_size,
            "Archive finalized"
        );

        let bytes_streamed = stream_file(&archive_path, self.config.stream_chunk_bytes, &tx).await?;
        metrics::ARCHIVE_BYTES_TOTAL.inc_by(bytes_streamed);

        Ok(BatchReport {
            batch_id: self.ctx.id(),
            file_name: self.config.archive_name.clone(),
            entries,
            failures,
            bytes_streamed,
        })
    }

    /// Add settled results to the archive until the pool drains, the
    /// consumer disconnects, or the archive breaks.
    async fn collect_results(
        &self,
        run: &mut PoolRun<SettledResult>,
        tx: &ChunkSender,
        archive: &mut ArchiveWriter,
        identifiers: &[String],
    ) -> Result<(Vec<String>, Vec<FailedItem>), BatchError> {
        let mut used = UsedNames::with_reserved([self.config.manifest_name.clone()]);
        let mut entries = Vec::new();
        let mut failures = Vec::new();

        loop {
            let step = tokio::select! {
                biased;
                _ = tx.closed() => Step::Disconnected,
                next = run.next() => Step::Settled(next),
            };

            let (index, result) = match step {
                Step::Disconnected => {
                    tracing::info!(
                        batch_id = %self.ctx.id(),
                        settled = run.settled(),
                        total = run.total(),
                        "Consumer disconnected"
                    );
                    return Err(BatchError::AbortedByConsumer);
                }
                Step::Settled(None) => return Ok((entries, failures)),
                Step::Settled(Some(next)) => next,
            };

            let settled = result.unwrap_or_else(|fault| SettledResult::Failure {
                identifier: identifiers[index].clone(),
                error: AcquisitionError::Internal(fault.to_string()),
            });

            match settled {
                SettledResult::Success {
                    identifier,
                    file_path,
                    entry_name,
                    ..
                } => {
                    let name = used.claim(&entry_name);
                    archive.add_file(&file_path, &name).await?;
                    tracing::info!(
                        batch_id = %self.ctx.id(),
                        identifier = %identifier,
                        entry = %name,
                        "Added archive entry"
                    );
                    entries.push(name);
                }
                SettledResult::Failure { identifier, error } => {
                    tracing::info!(
                        batch_id = %self.ctx.id(),
                        identifier = %identifier,
                        error = %error,
                        "Task failed"
                    );
                    failures.push(FailedItem {
                        identifier,
                        error: error.to_string(),
                    });
                }
            }
        }
    }
}
