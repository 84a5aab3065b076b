//! Batch acquisition into a single streamed zip archive.
//!
//! A batch runs one acquisition per identifier through a bounded pool,
//! adds every success to a zip spooled in the batch workspace as soon as it
//! settles, appends a failure manifest when anything failed, then streams
//! the archive to the consumer. [`BatchContext`] tracks the subprocesses
//! and files of the batch and tears them down exactly once, whether the
//! batch completes, fails, or the consumer drops the stream.
//!
//! # Example
//!
//! ```ignore
//! let download = assembler.assemble(requests, 4).await?;
//! let (stream, outcome) = download.into_parts();
//! // hand `stream` to the HTTP layer ...
//! let report = outcome.wait().await?;
//! println!("{} entries, {} failures", report.entries.len(), report.failures.len());
//! ```

mod archive;
mod assembler;
mod context;
mod error;
mod live;
mod stream;

pub use archive::{failure_manifest, ArchiveWriter};
pub use assembler::ArchiveAssembler;
pub use context::{BatchContext, BatchState, ProcessGuard};
pub use error::BatchError;
pub use live::LiveBatches;
pub use stream::{ArchiveStream, BatchDownload, BatchOutcome, BatchReport, FailedItem};

pub(crate) use stream::{spawn_delivery, stream_file};
