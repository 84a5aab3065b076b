//! Registry of batches whose workspace is in use.

use dashmap::DashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Directory name prefix of batch workspaces.
pub(crate) const WORKSPACE_PREFIX: &str = "batch-";

/// Ids of batches that have not been cleaned up yet.
///
/// Shared by the service, whose batches enter on creation and leave after
/// cleanup, and the janitor, which must leave their workspaces alone.
#[derive(Clone, Default)]
pub struct LiveBatches {
    ids: Arc<DashSet<Uuid>>,
}

impl LiveBatches {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn enter(&self, id: Uuid) {
        self.ids.insert(id);
    }

    pub(crate) fn leave(&self, id: Uuid) {
        self.ids.remove(&id);
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether a temp-dir entry called `name` is the workspace of a live batch.
    pub fn owns_workspace(&self, name: &str) -> bool {
        name.strip_prefix(WORKSPACE_PREFIX)
            .and_then(|id| Uuid::parse_str(id).ok())
            .is_some_and(|id| self.contains(id))
    }
}
