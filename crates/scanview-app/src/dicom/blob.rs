use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::types::RawContainer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobId(pub u64);

#[derive(Default)]
struct Inner {
    next_id: u64,
    blobs: HashMap<BlobId, RawContainer>,
}

/// Addressable store for containers referenced by frame ids.
///
/// One registry per viewer shell. Entries live exactly as long as their lease.
#[derive(Clone, Default)]
pub struct BlobRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl BlobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, container: RawContainer) -> BlobLease {
        let mut inner = lock(&self.inner);
        inner.next_id += 1;
        let id = BlobId(inner.next_id);
        inner.blobs.insert(id, container);
        BlobLease {
            id,
            registry: Arc::clone(&self.inner),
        }
    }

    pub fn resolve(&self, id: BlobId) -> Option<RawContainer> {
        lock(&self.inner).blobs.get(&id).cloned()
    }

    pub fn live_count(&self) -> usize {
        lock(&self.inner).blobs.len()
    }
}

/// Ownership token for a registered blob. Revokes it on drop.
pub struct BlobLease {
    id: BlobId,
    registry: Arc<Mutex<Inner>>,
}

impl BlobLease {
    pub fn id(&self) -> BlobId {
        self.id
    }
}

impl std::fmt::Debug for BlobLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BlobLease").field(&self.id.0).finish()
    }
}

impl Drop for BlobLease {
    fn drop(&mut self) {
        if lock(&self.registry).blobs.remove(&self.id).is_some() {
            log::debug!("Revoked blob {}", self.id.0);
        }
    }
}

// A poisoned registry only means another thread panicked mid-insert; the map is still valid.
fn lock(inner: &Mutex<Inner>) -> std::sync::MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
