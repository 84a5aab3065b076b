//! Per-identifier progress tracking.
//!
//! Each running acquisition writes its phase, percent and result details
//! into a shared [`ProgressStore`]. Pollers read snapshots at their own pace.

mod store;
mod types;

pub use store::ProgressStore;
pub use types::{Phase, ProgressRecord, ProgressUpdate};
