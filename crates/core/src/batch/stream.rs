//! Delivery of a batch's output as a byte stream.

use bytes::{Bytes, BytesMut};
use futures::Stream;
use serde::Serialize;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::{BatchContext, BatchError, BatchState};

/// Chunks buffered between the producer and the consumer.
const STREAM_BUFFER: usize = 4;

pub(crate) type ChunkSender = mpsc::Sender<Result<Bytes, BatchError>>;

/// One identifier that did not make it into the output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedItem {
    pub identifier: String,
    pub error: String,
}

/// Summary of a completed batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    /// Name the output was delivered under.
    pub file_name: String,
    /// Media entries, in the order they were added.
    pub entries: Vec<String>,
    pub failures: Vec<FailedItem>,
    pub bytes_streamed: u64,
}

/// Output bytes of a batch. Dropping it before the end aborts the batch.
pub struct ArchiveStream {
    rx: mpsc::Receiver<Result<Bytes, BatchError>>,
}

impl Stream for ArchiveStream {
    type Item = Result<Bytes, BatchError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Resolves once the batch reached its terminal state and was cleaned up.
pub struct BatchOutcome {
    rx: oneshot::Receiver<Result<BatchReport, BatchError>>,
}

impl BatchOutcome {
    pub async fn wait(self) -> Result<BatchReport, BatchError> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(BatchError::Stream("batch driver stopped".to_string())))
    }
}

/// A running batch: its output stream plus the eventual outcome.
pub struct BatchDownload {
    batch_id: Uuid,
    file_name: String,
    content_type: &'static str,
    context: Arc<BatchContext>,
    stream: ArchiveStream,
    outcome: BatchOutcome,
}

impl BatchDownload {
    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    pub fn context(&self) -> &Arc<BatchContext> {
        &self.context
    }

    pub fn into_parts(self) -> (ArchiveStream, BatchOutcome) {
        (self.stream, self.outcome)
    }

    /// Drain the stream into memory, then wait for the outcome.
    pub async fn collect(self) -> (Vec<u8>, Result<BatchReport, BatchError>) {
        use futures::StreamExt;

        let (mut stream, outcome) = self.into_parts();
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => body.extend_from_slice(&bytes),
                Err(_) => break,
            }
        }
        drop(stream);
        (body, outcome.wait().await)
    }
}

/// Spawn the producer of a batch's output.
///
/// `produce` gets the sending half of the stream; when it returns the batch
/// is settled according to its result, cleaned up, and the outcome is
/// published.
pub(crate) fn spawn_delivery<F, Fut>(
    context: Arc<BatchContext>,
    file_name: String,
    content_type: &'static str,
    produce: F,
) -> BatchDownload
where
    F: FnOnce(ChunkSender) -> Fut + Send + 'static,
    Fut: Future<Output = Result<BatchReport, BatchError>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let (outcome_tx, outcome_rx) = oneshot::channel();

    let ctx = Arc::clone(&context);
    tokio::spawn(async move {
        let result = produce(tx.clone()).await;
        let state = match &result {
            Ok(_) => BatchState::Completed,
            Err(BatchError::AbortedByConsumer) => BatchState::Aborted,
            Err(_) => BatchState::Failed,
        };
        if let Err(e) = &result {
            tracing::debug!(batch_id = %ctx.id(), error = %e, "Batch producer stopped");
            if state == BatchState::Failed {
                // The consumer must not mistake a truncated body for a complete one
                let _ = tx.send(Err(e.clone())).await;
            }
        }
        // Close the stream only once the workspace is gone
        ctx.finish(state).await;
        drop(tx);
        let _ = outcome_tx.send(result);
    });

    BatchDownload {
        batch_id: context.id(),
        file_name,
        content_type,
        context,
        stream: ArchiveStream { rx },
        outcome: BatchOutcome { rx: outcome_rx },
    }
}

/// Send `path` down `tx` in chunks of `chunk_size`. Returns the bytes sent.
pub(crate) async fn stream_file(
    path: &Path,
    chunk_size: usize,
    tx: &ChunkSender,
) -> Result<u64, BatchError> {
    let chunk_size = chunk_size.max(1);
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| BatchError::Stream(format!("{}: {}", path.display(), e)))?;

    let mut sent = 0u64;
    loop {
        let mut buf = BytesMut::with_capacity(chunk_size);
        let n = file.read_buf(&mut buf).await.map_err(BatchError::stream)?;
        if n == 0 {
            return Ok(sent);
        }
        tx.send(Ok(buf.freeze()))
            .await
            .map_err(|_| BatchError::AbortedByConsumer)?;
        sent += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::LiveBatches;
    use futures::StreamExt;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_stream_file_chunks() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.bin");
        std::fs::write(&path, vec![7u8; 10_000]).unwrap();

        let (tx, rx) = mpsc::channel(64);
        let sent = stream_file(&path, 4096, &tx).await.unwrap();
        drop(tx);
        assert_eq!(sent, 10_000);

        let chunks: Vec<_> = ArchiveStream { rx }.collect().await;
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| c.as_ref().unwrap().len() <= 4096));
        let total: usize = chunks.iter().map(|c| c.as_ref().unwrap().len()).sum();
        assert_eq!(total, 10_000);
    }

    #[tokio::test]
    async fn test_stream_file_reports_disconnect() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.bin");
        std::fs::write(&path, vec![1u8; 100]).unwrap();

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let err = stream_file(&path, 10, &tx).await.unwrap_err();
        assert_eq!(err, BatchError::AbortedByConsumer);
    }

    #[tokio::test]
    async fn test_stream_file_missing_source() {
        let temp = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let err = stream_file(&temp.path().join("missing"), 10, &tx).await.unwrap_err();
        assert!(matches!(err, BatchError::Stream(_)));
    }

    #[tokio::test]
    async fn test_spawn_delivery_forwards_failure_to_consumer() {
        let temp = TempDir::new().unwrap();
        let ctx = BatchContext::create(temp.path(), vec!["mp3".into()], &LiveBatches::new())
            .await
            .unwrap();
        let missing = temp.path().join("missing.zip");

        let download = spawn_delivery(ctx, "x.zip".to_string(), "application/zip", move |tx| async move {
            let bytes_streamed = stream_file(&missing, 16, &tx).await?;
            Ok::<_, BatchError>(BatchReport {
                batch_id: uuid::Uuid::nil(),
                file_name: "x.zip".to_string(),
                entries: Vec::new(),
                failures: Vec::new(),
                bytes_streamed,
            })
        });
        let context = Arc::clone(download.context());

        let (mut stream, outcome) = download.into_parts();
        assert!(matches!(stream.next().await, Some(Err(BatchError::Stream(_)))));
        assert!(stream.next().await.is_none());
        assert!(matches!(outcome.wait().await, Err(BatchError::Stream(_))));
        assert_eq!(context.state(), BatchState::Failed);
    }

    #[tokio::test]
    async fn test_spawn_delivery_settles_and_cleans_up() {
        let temp = TempDir::new().unwrap();
        let ctx = BatchContext::create(temp.path(), vec!["mp3".into()], &LiveBatches::new())
            .await
            .unwrap();
        let workspace = ctx.workspace().to_path_buf();
        let batch_id = ctx.id();

        let download = spawn_delivery(ctx, "x.bin".to_string(), "application/octet-stream", move |tx| async move {
            if tx.send(Ok(Bytes::from_static(b"hello"))).await.is_err() {
                return Err(BatchError::AbortedByConsumer);
            }
            Ok(BatchReport {
                batch_id,
                file_name: "x.bin".to_string(),
                entries: vec!["x.bin".to_string()],
                failures: Vec::new(),
                bytes_streamed: 5,
            })
        });
        let context = Arc::clone(download.context());

        let (body, outcome) = download.collect().await;
        assert_eq!(body, b"hello");
        assert_eq!(outcome.unwrap().bytes_streamed, 5);
        assert_eq!(context.state(), BatchState::Completed);
        assert!(!workspace.exists());
    }
}
