use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use super::{ProgressRecord, ProgressUpdate};

/// Concurrent identifier → progress map, shared by cloning.
///
/// Lives as long as the service. Records are only evicted on request
/// (see [`ProgressStore::evict_finished_before`]).
#[derive(Debug, Clone, Default)]
pub struct ProgressStore {
    records: Arc<DashMap<String, ProgressRecord>>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new record for `identifier`, replacing any left over from a
    /// previous batch.
    pub fn begin(&self, identifier: &str) -> ProgressRecord {
        let record = ProgressRecord::queued(identifier);
        self.records.insert(identifier.to_string(), record.clone());
        record
    }

    /// Merge `update` into the record, creating it on first write.
    /// Returns the merged snapshot.
    pub fn update(&self, identifier: &str, update: ProgressUpdate) -> ProgressRecord {
        let mut entry = self
            .records
            .entry(identifier.to_string())
            .or_insert_with(|| ProgressRecord::queued(identifier));
        entry.apply(update);
        entry.value().clone()
    }

    pub fn read(&self, identifier: &str) -> Option<ProgressRecord> {
        self.records.get(identifier).map(|r| r.value().clone())
    }

    pub fn remove(&self, identifier: &str) -> Option<ProgressRecord> {
        self.records.remove(identifier).map(|(_, r)| r)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop records that finished before `cutoff`. Returns how many were removed.
    pub fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, record| record.finished_at.map_or(true, |at| at >= cutoff));
        before.saturating_sub(self.records.len())
    }
}
