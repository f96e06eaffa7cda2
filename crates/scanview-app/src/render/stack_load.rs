use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, TryRecvError};

use crate::dicom::{DecodedFrame, FrameId, FrameResolver};
use crate::error::FrameLoadError;

pub type StackLoadResult = Result<Vec<DecodedFrame>, FrameLoadError>;

/// Background resolution of a frame stack into pixels.
///
/// Dropping the job cancels it; the worker checks the flag between frames.
pub struct StackLoad {
    result_rx: Receiver<StackLoadResult>,
    cancel: Arc<AtomicBool>,
}

impl StackLoad {
    pub(super) fn spawn(viewport: &str, ids: Vec<FrameId>, resolver: Arc<dyn FrameResolver>) -> Self {
        let (result_tx, result_rx) = bounded::<StackLoadResult>(1);
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);

        let spawned = thread::Builder::new()
            .name(format!("stack-load-{viewport}"))
            .spawn(move || {
                let mut frames = Vec::with_capacity(ids.len());
                for id in &ids {
                    if flag.load(Ordering::Relaxed) {
                        return;
                    }
                    match resolver.resolve(id) {
                        Ok(frame) => frames.push(frame),
                        Err(e) => {
                            log::warn!("Failed to load {id}: {e}");
                            let _ = result_tx.send(Err(e));
                            return;
                        }
                    }
                }
                if !flag.load(Ordering::Relaxed) {
                    let _ = result_tx.send(Ok(frames));
                }
            });
        if let Err(e) = spawned {
            log::error!("Failed to spawn stack load thread: {e}");
        }

        Self {
            result_rx,
            cancel,
        }
    }

    /// Non-blocking. `None` while the worker is still resolving frames.
    pub fn poll(&self) -> Option<StackLoadResult> {
        match self.result_rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(FrameLoadError::Cancelled)),
        }
    }

    /// Block until the worker finishes.
    #[cfg(test)]
    pub fn wait(self) -> StackLoadResult {
        self.result_rx
            .recv()
            .unwrap_or(Err(FrameLoadError::Cancelled))
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

impl Drop for StackLoad {
    fn drop(&mut self) {
        self.cancel();
    }
}
