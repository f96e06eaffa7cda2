use super::shell::ShellProps;
use crate::dicom::RawContainer;
use crate::error::FetchError;
use crate::fetch::{FetchCoordinator, FetchJob, FetchStart};

enum SessionState {
    Fetching(FetchJob),
    Ready(RawContainer),
    Failed(FetchError),
    Unavailable(String),
    Closed,
}

/// One scan being viewed: resolves its container once (cache or download)
/// and feeds the shell's props.
pub struct ScanSession {
    scan_id: u64,
    state: SessionState,
}

impl ScanSession {
    /// `filename` is the scan's stored name; `None` when the server has none.
    pub fn open(coordinator: &FetchCoordinator, scan_id: u64, filename: Option<&str>) -> Self {
        let state = match filename {
            Some(name) => match coordinator.start(scan_id, name) {
                FetchStart::Cached(container) => SessionState::Ready(container),
                FetchStart::Pending(job) => SessionState::Fetching(job),
            },
            None => match coordinator.cache().get(scan_id) {
                Some(container) => SessionState::Ready(container),
                None => SessionState::Unavailable(format!("Scan {scan_id} has no stored file")),
            },
        };
        Self { scan_id, state }
    }

    pub fn scan_id(&self) -> u64 {
        self.scan_id
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self.state, SessionState::Fetching(_))
    }

    /// Advance the download. Returns the error if it failed during this call.
    pub fn poll(&mut self) -> Option<FetchError> {
        let SessionState::Fetching(job) = &mut self.state else {
            return None;
        };
        match job.poll()? {
            Ok(container) => {
                self.state = SessionState::Ready(container);
                None
            }
            Err(e) => {
                self.state = SessionState::Failed(e.clone());
                Some(e)
            }
        }
    }

    pub fn props(&self) -> ShellProps {
        match &self.state {
            SessionState::Fetching(job) => ShellProps {
                scan_file: None,
                loading_progress: job.progress().percent().unwrap_or(0),
                is_scan_loading: true,
                fetch_error: None,
            },
            SessionState::Ready(container) => ShellProps::with_file(container.clone()),
            SessionState::Failed(e) => ShellProps {
                scan_file: None,
                loading_progress: 0,
                is_scan_loading: false,
                fetch_error: Some(e.to_string()),
            },
            SessionState::Unavailable(reason) => ShellProps {
                scan_file: None,
                loading_progress: 0,
                is_scan_loading: false,
                fetch_error: Some(reason.clone()),
            },
            SessionState::Closed => ShellProps {
                is_scan_loading: false,
                ..ShellProps::default()
            },
        }
    }

    /// Drop any download in flight.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::coordinator::tests::MockTransport;
    use crate::fetch::{ScanTransport, SessionCache};
    use crate::render::SurfaceElement;
    use crate::viewer::shell::tests::{config, software};
    use crate::viewer::shell::{ViewerShell, ViewerView};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn coordinator(transport: MockTransport) -> FetchCoordinator {
        let transport: Arc<dyn ScanTransport> = Arc::new(transport);
        FetchCoordinator::new(transport, SessionCache::new())
    }

    fn settle(session: &mut ScanSession) {
        for _ in 0..400 {
            session.poll();
            if session.is_settled() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("session never settled");
    }

    #[test]
    fn cached_scan_is_ready_immediately() {
        let coordinator = coordinator(MockTransport::default());
        coordinator.cache().insert(9, RawContainer::new(vec![1, 2]));
        let session = ScanSession::open(&coordinator, 9, Some("x.dcm"));
        assert!(session.is_settled());
        let props = session.props();
        assert!(props.scan_file.is_some());
        assert_eq!(props.loading_progress, 100);
        assert!(!props.is_scan_loading);
    }

    #[test]
    fn download_reports_loading_then_file() {
        let coordinator = coordinator(MockTransport::serving(vec![5; 32]));
        let mut session = ScanSession::open(&coordinator, 1, Some("x.dcm"));
        assert!(session.props().is_scan_loading || session.is_settled());
        settle(&mut session);
        let props = session.props();
        assert_eq!(props.scan_file.map(|c| c.len()), Some(32));
    }

    #[test]
    fn failure_is_reported_once() {
        let coordinator = coordinator(MockTransport {
            failure: Some(FetchError::Unauthorized),
            ..MockTransport::default()
        });
        let mut session = ScanSession::open(&coordinator, 1, Some("x.dcm"));
        let mut errors = Vec::new();
        for _ in 0..400 {
            if let Some(e) = session.poll() {
                errors.push(e);
            }
            if session.is_settled() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(session.poll().is_none());
        assert!(matches!(errors.as_slice(), [FetchError::Unauthorized]));
        let props = session.props();
        assert!(!props.is_scan_loading);
        assert_eq!(props.fetch_error.as_deref(), Some("session expired, sign in again"));
    }

    #[test]
    fn missing_stored_file_is_unavailable() {
        let coordinator = coordinator(MockTransport::default());
        let session = ScanSession::open(&coordinator, 3, None);
        let props = session.props();
        assert!(props.scan_file.is_none());
        assert!(!props.is_scan_loading);
        assert!(props.fetch_error.unwrap().contains("no stored file"));
    }

    #[test]
    fn unmount_during_fetch_ignores_the_result() {
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let coordinator = coordinator(MockTransport {
            gate: Some(Mutex::new(gate_rx)),
            ..MockTransport::serving(vec![7; 16])
        });
        let mut session = ScanSession::open(&coordinator, 1, Some("x.dcm"));
        let mut shell = ViewerShell::mount_dicom(&config(), SurfaceElement::new("c", 8, 8), software);
        shell.set_props(session.props());
        assert!(matches!(shell.view(), ViewerView::ServerLoading { .. }));

        shell.unmount();
        session.close();
        drop(gate_tx);
        std::thread::sleep(Duration::from_millis(20));
        assert!(session.poll().is_none());
        shell.set_props(session.props());
        shell.update(Duration::from_secs(1));

        assert_eq!(shell.view(), ViewerView::Unmounted);
        assert_eq!(shell.blobs().live_count(), 0);
        assert!(shell.engine().unwrap().is_torn_down());
    }
}
