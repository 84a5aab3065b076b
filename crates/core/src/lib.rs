pub mod acquisition;
pub mod batch;
pub mod config;
pub mod extractor;
pub mod janitor;
pub mod metrics;
pub mod pool;
mod process;
pub mod progress;
pub mod sanitize;
pub mod service;
pub mod testing;

pub use acquisition::{AcquisitionError, AcquisitionRequest, SettledResult, TimeoutPolicy};
pub use batch::{BatchDownload, BatchError, BatchReport, BatchState, FailedItem, LiveBatches};
pub use config::{
    load_config, load_config_from_env, load_config_from_str, validate_config, Config,
    ConfigError, SanitizedConfig,
};
pub use extractor::{Extractor, ExtractorError, MediaEntry, YtDlpExtractor};
pub use janitor::{Janitor, SweepReport};
pub use progress::{Phase, ProgressRecord, ProgressStore};
pub use service::AcquisitionService;
