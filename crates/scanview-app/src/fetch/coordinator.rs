use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, TryRecvError, TrySendError};

use super::cache::SessionCache;
use super::client::ScanTransport;
use super::types::FetchProgress;
use crate::dicom::RawContainer;
use crate::error::FetchError;

/// Messages from a download worker.
#[derive(Debug)]
pub enum FetchEvent {
    Progress(FetchProgress),
    Done(RawContainer),
    Failed(FetchError),
}

/// Outcome of starting a fetch: served from the session cache, or downloading.
pub enum FetchStart {
    Cached(RawContainer),
    Pending(FetchJob),
}

/// Runs container downloads off the event loop, short-circuiting through
/// the session cache.
pub struct FetchCoordinator {
    transport: Arc<dyn ScanTransport>,
    cache: SessionCache,
}

impl FetchCoordinator {
    pub fn new(transport: Arc<dyn ScanTransport>, cache: SessionCache) -> Self {
        Self { transport, cache }
    }

    pub fn transport(&self) -> &Arc<dyn ScanTransport> {
        &self.transport
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    /// Checks the cache once. A hit emits no progress and spawns nothing.
    pub fn start(&self, scan_id: u64, filename: &str) -> FetchStart {
        if let Some(container) = self.cache.get(scan_id) {
            log::info!("Scan {scan_id} served from session cache");
            return FetchStart::Cached(container);
        }
        FetchStart::Pending(FetchJob::spawn(
            scan_id,
            filename.to_string(),
            Arc::clone(&self.transport),
        ))
    }

    /// Upload a local file and remember its bytes under the new scan id.
    pub fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<u64, FetchError> {
        let scan_id = self.transport.upload(filename, &bytes)?;
        self.cache.insert(scan_id, RawContainer::new(bytes));
        Ok(scan_id)
    }
}

/// One in-flight download. Dropping it cancels the worker and discards its result.
pub struct FetchJob {
    events: Receiver<FetchEvent>,
    cancel: Arc<AtomicBool>,
    progress: FetchProgress,
}

impl FetchJob {
    fn spawn(scan_id: u64, filename: String, transport: Arc<dyn ScanTransport>) -> Self {
        let (tx, events) = crossbeam_channel::bounded(64);
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);

        let spawned = thread::Builder::new()
            .name(format!("fetch-scan-{scan_id}"))
            .spawn(move || {
                let result = transport.fetch_scan(&filename, &mut |progress| {
                    if flag.load(Ordering::Relaxed) {
                        return false;
                    }
                    match tx.try_send(FetchEvent::Progress(progress)) {
                        // A later update supersedes this one
                        Ok(()) | Err(TrySendError::Full(_)) => true,
                        Err(TrySendError::Disconnected(_)) => false,
                    }
                });
                if flag.load(Ordering::Relaxed) {
                    log::debug!("Fetch of {filename} discarded after cancel");
                    return;
                }
                let event = match result {
                    Ok(bytes) => {
                        let container = RawContainer::new(bytes);
                        log::info!("Fetched {}: {:.1} MB", filename, container.size_mb());
                        FetchEvent::Done(container)
                    }
                    Err(e) => {
                        log::warn!("Fetch of {filename} failed: {e}");
                        FetchEvent::Failed(e)
                    }
                };
                let _ = tx.send(event);
            });
        if let Err(e) = spawned {
            log::error!("Failed to spawn fetch thread: {e}");
        }

        Self {
            events,
            cancel,
            progress: FetchProgress::default(),
        }
    }

    /// Latest progress. Never goes backwards within one job.
    pub fn progress(&self) -> FetchProgress {
        self.progress
    }

    fn record(&mut self, progress: FetchProgress) {
        if progress.loaded_bytes >= self.progress.loaded_bytes {
            self.progress = progress;
        }
    }

    /// Drain pending events. Returns the final result once the worker settles.
    pub fn poll(&mut self) -> Option<Result<RawContainer, FetchError>> {
        loop {
            match self.events.try_recv() {
                Ok(FetchEvent::Progress(p)) => self.record(p),
                Ok(FetchEvent::Done(container)) => {
                    self.record(FetchProgress {
                        loaded_bytes: container.len() as u64,
                        total_bytes: self.progress.total_bytes,
                    });
                    return Some(Ok(container));
                }
                Ok(FetchEvent::Failed(e)) => return Some(Err(e)),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => return Some(Err(FetchError::Cancelled)),
            }
        }
    }

    /// Block until the worker settles.
    #[cfg(test)]
    pub fn wait(mut self) -> Result<RawContainer, FetchError> {
        loop {
            match self.events.recv() {
                Ok(FetchEvent::Progress(p)) => self.record(p),
                Ok(FetchEvent::Done(container)) => return Ok(container),
                Ok(FetchEvent::Failed(e)) => return Err(e),
                Err(_) => return Err(FetchError::Cancelled),
            }
        }
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

impl Drop for FetchJob {
    fn drop(&mut self) {
        self.cancel();
    }
}
