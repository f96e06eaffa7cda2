use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::dicom::RawContainer;

/// Containers already present in this session, keyed by scan id.
///
/// Filled at upload time so viewing a just-uploaded scan skips the download.
#[derive(Clone, Default)]
pub struct SessionCache {
    scans: Arc<Mutex<HashMap<u64, RawContainer>>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, RawContainer>> {
        self.scans.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, scan_id: u64) -> Option<RawContainer> {
        self.lock().get(&scan_id).cloned()
    }

    pub fn insert(&self, scan_id: u64, container: RawContainer) {
        log::debug!("Cached scan {scan_id} ({:.1} MB)", container.size_mb());
        self.lock().insert(scan_id, container);
    }

    pub fn remove(&self, scan_id: u64) -> Option<RawContainer> {
        self.lock().remove(&scan_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
