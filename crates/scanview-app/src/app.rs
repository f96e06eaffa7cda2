use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, TryRecvError};
use winit::keyboard::KeyCode;
use winit::window::Window;

use crate::auth::SessionStore;
use crate::error::{FetchError, ViewerError};
use crate::fetch::FetchCoordinator;
use crate::gpu::GpuSurface;
use crate::launch::{self, LocalIds, ResolvedScan};
use crate::render::SurfaceElement;
use crate::settings::ViewerConfig;
use crate::snapshot;
use crate::viewer::{ScanSession, ShellProps, ViewerShell, ViewerView};

const NO_SCAN: &str = "No scan selected, press O to open a file";

pub struct App {
    pub window: Arc<Window>,
    pub shell: ViewerShell<GpuSurface>,
    pub coordinator: FetchCoordinator,
    pub session: Option<ScanSession>,
    pub session_store: Option<SessionStore>,
    pub config: ViewerConfig,
    pub local_ids: LocalIds,
    pub last_frame: Instant,
    pub quit_requested: bool,
    file_dialog_rx: Option<Receiver<PathBuf>>,
    title: String,
}

impl App {
    pub fn new(
        window: Arc<Window>,
        config: ViewerConfig,
        coordinator: FetchCoordinator,
        session_store: Option<SessionStore>,
        initial: Option<ResolvedScan>,
        local_ids: LocalIds,
    ) -> Self {
        let size = window.inner_size();
        let element = SurfaceElement::new(config.viewport_id.clone(), size.width, size.height);
        let surface_window = Arc::clone(&window);
        let shell = ViewerShell::mount_dicom(&config, element, move |_| {
            GpuSurface::new(surface_window)
        });

        let session = initial.map(|scan| {
            ScanSession::open(&coordinator, scan.scan_id, scan.filename.as_deref())
        });

        Self {
            window,
            shell,
            coordinator,
            session,
            session_store,
            config,
            local_ids,
            last_frame: Instant::now(),
            quit_requested: false,
            file_dialog_rx: None,
            title: String::new(),
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.shell.resize(width, height);
        }
    }

    /// One event-loop iteration: fetch progress, stack load, playback ticks.
    pub fn update(&mut self) {
        let now = Instant::now();
        let dt = now - self.last_frame;
        self.last_frame = now;

        self.poll_file_dialog();

        let props = match self.session.as_mut() {
            Some(session) => {
                if let Some(FetchError::Unauthorized) = session.poll() {
                    if let Some(store) = &self.session_store {
                        store.invalidate();
                    }
                }
                session.props()
            }
            None => ShellProps {
                is_scan_loading: false,
                fetch_error: Some(NO_SCAN.to_string()),
                ..ShellProps::default()
            },
        };
        self.shell.set_props(props);
        self.shell.update(dt);

        let title = window_title(&self.shell.view());
        if title != self.title {
            self.window.set_title(&title);
            self.title = title;
        }
    }

    pub fn redraw(&mut self) {
        self.shell.redraw();
    }

    pub fn handle_key(&mut self, key: KeyCode) {
        let result = match key {
            KeyCode::ArrowLeft => self.shell.step(-1),
            KeyCode::ArrowRight => self.shell.step(1),
            KeyCode::Space => self.shell.toggle_play(),
            KeyCode::KeyP => self.shell.pause(),
            KeyCode::Home => self.shell.first(),
            KeyCode::End => self.shell.last(),
            KeyCode::KeyS => {
                self.save_snapshot();
                Ok(())
            }
            KeyCode::KeyO => {
                self.open_file_dialog();
                Ok(())
            }
            KeyCode::Escape => {
                self.quit_requested = true;
                Ok(())
            }
            _ => Ok(()),
        };
        match result {
            Ok(()) => {}
            Err(ViewerError::NotReady) => log::debug!("Ignoring {key:?}: viewer not ready"),
            Err(e) => log::warn!("{key:?} failed: {e}"),
        }
    }

    fn save_snapshot(&self) {
        let (Some(session), Some(frame)) = (&self.session, self.shell.current_frame()) else {
            log::info!("Nothing to snapshot yet");
            return;
        };
        let index = self.shell.playback_state().current_index;
        let path = snapshot::snapshot_path(&self.config.snapshot_dir(), session.scan_id(), index);
        if let Err(e) = snapshot::save_png(frame, &path) {
            log::error!("Snapshot failed: {e:#}");
        }
    }

    fn open_file_dialog(&mut self) {
        if self.file_dialog_rx.is_some() {
            return;
        }
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.file_dialog_rx = Some(rx);
        let spawned = std::thread::Builder::new()
            .name("file-dialog".into())
            .spawn(move || {
                let dialog = rfd::FileDialog::new()
                    .set_title("Open scan")
                    .add_filter("DICOM", &["dcm", "dicom", "ima"])
                    .add_filter("All files", &["*"]);
                if let Some(path) = dialog.pick_file() {
                    let _ = tx.send(path);
                }
            });
        if let Err(e) = spawned {
            log::error!("Failed to spawn file dialog: {e}");
            self.file_dialog_rx = None;
        }
    }

    fn poll_file_dialog(&mut self) {
        let Some(rx) = &self.file_dialog_rx else {
            return;
        };
        match rx.try_recv() {
            Ok(path) => {
                self.file_dialog_rx = None;
                self.open_local(&path);
            }
            // Dialog was cancelled (sender dropped without sending)
            Err(TryRecvError::Disconnected) => self.file_dialog_rx = None,
            Err(TryRecvError::Empty) => {}
        }
    }

    fn open_local(&mut self, path: &std::path::Path) {
        match launch::open_local(&self.coordinator, path, &mut self.local_ids) {
            Ok(scan) => {
                if let Some(previous) = self.session.as_mut() {
                    previous.close();
                    if previous.scan_id() >= launch::LOCAL_ID_BASE {
                        self.coordinator.cache().remove(previous.scan_id());
                        log::debug!(
                            "Evicted local scan {} ({} cached)",
                            previous.scan_id(),
                            self.coordinator.cache().len()
                        );
                    }
                }
                self.session = Some(ScanSession::open(&self.coordinator, scan.scan_id, None));
            }
            Err(e) => log::error!("{e:#}"),
        }
    }

    /// Cancel outstanding work and release the GPU before the window goes away.
    pub fn shutdown(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.close();
        }
        self.shell.unmount();
    }
}

/// Window title for each viewer state.
pub fn window_title(view: &ViewerView) -> String {
    match view {
        ViewerView::ServerLoading { progress } => {
            format!("scanview - Loading scan from server... {progress}%")
        }
        ViewerView::Unavailable { reason } => format!("scanview - {reason}"),
        ViewerView::EngineFailed { message } => format!("scanview - Viewer error: {message}"),
        ViewerView::Rendering => "scanview - Rendering scan...".to_string(),
        ViewerView::Ready {
            playback,
            controls_enabled,
            error,
        } => {
            let mut title = format!(
                "scanview - Slice {} / {}",
                playback.current_index + 1,
                playback.total_slices.max(1)
            );
            if *controls_enabled {
                title.push_str(if playback.is_playing { " [playing]" } else { " [paused]" });
            }
            if let Some(error) = error {
                title.push_str(" - ");
                title.push_str(error);
            }
            title
        }
        ViewerView::Unmounted => "scanview".to_string(),
    }
}
