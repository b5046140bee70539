use parking_lot::RwLock;
use std::collections::HashSet;
use uuid::Uuid;

/// Shared set of runs whose cancellation was requested.
///
/// A flag stays set until the orchestrator clears it after the run reached a
/// terminal state, so a reader never observes a cancel being withdrawn mid-run.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    requested: RwLock<HashSet<Uuid>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when a cancel for this run was already pending.
    pub fn request_cancel(&self, id: Uuid) -> bool {
        self.requested.write().insert(id)
    }

    pub fn is_cancel_requested(&self, id: Uuid) -> bool {
        self.requested.read().contains(&id)
    }

    pub fn clear(&self, id: Uuid) {
        self.requested.write().remove(&id);
    }
}
