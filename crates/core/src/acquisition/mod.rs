//! Single-identifier acquisition: run the extraction tool, follow its
//! progress, enforce a deadline and classify the outcome.

mod error;
mod executor;
mod types;

pub use error::AcquisitionError;
pub use executor::{find_output, TaskExecutor};
pub use types::{AcquisitionRequest, SettledResult, TimeoutPolicy};
