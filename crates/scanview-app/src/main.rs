mod app;
mod auth;
mod cli;
mod dicom;
mod error;
mod fetch;
mod gpu;
mod launch;
mod render;
mod settings;
mod snapshot;
mod viewer;

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::PhysicalKey;
use winit::window::{WindowAttributes, WindowId};

use app::App;
use auth::SessionStore;
use cli::LaunchArgs;
use error::FetchError;
use fetch::{FetchCoordinator, ScanApi, ScanTransport, SessionCache};
use launch::{LocalIds, ResolvedScan};
use render::{SoftwareSurface, SurfaceElement};
use settings::ViewerConfig;
use viewer::{ScanSession, ViewerShell, ViewerView};

/// Event loop wake-up period while idle.
const FRAME_PERIOD: Duration = Duration::from_millis(16);
const HEADLESS_SIZE: u32 = 512;
const HEADLESS_POLL: Duration = Duration::from_millis(10);

/// Everything the window needs, handed over once it exists.
struct Launch {
    config: ViewerConfig,
    coordinator: FetchCoordinator,
    session_store: Option<SessionStore>,
    initial: Option<ResolvedScan>,
    local_ids: LocalIds,
}

struct ScanviewApp {
    launch: Option<Launch>,
    app: Option<App>,
}

impl ApplicationHandler for ScanviewApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let Some(launch) = self.launch.take() else {
            return;
        };

        let attrs = WindowAttributes::default()
            .with_title("scanview")
            .with_inner_size(winit::dpi::LogicalSize::new(1024, 1024));
        let window = match event_loop.create_window(attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Failed to create window: {e}");
                event_loop.exit();
                return;
            }
        };

        self.app = Some(App::new(
            window,
            launch.config,
            launch.coordinator,
            launch.session_store,
            launch.initial,
            launch.local_ids,
        ));
        log::info!("scanview initialized");
    }

    fn window_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(app) = self.app.as_mut() else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                app.quit_requested = true;
            }
            WindowEvent::Resized(size) => {
                app.resize(size.width, size.height);
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => app.handle_key(key),
            WindowEvent::RedrawRequested => app.redraw(),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(app) = self.app.as_mut() else {
            return;
        };
        app.update();
        if app.quit_requested {
            app.shutdown();
            event_loop.exit();
            return;
        }
        event_loop.set_control_flow(ControlFlow::WaitUntil(Instant::now() + FRAME_PERIOD));
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(app) = self.app.as_mut() {
            app.shutdown();
        }
    }
}

fn invalidate_on_unauthorized(error: Option<&FetchError>, store: Option<&SessionStore>) {
    if let (Some(FetchError::Unauthorized), Some(store)) = (error, store) {
        store.invalidate();
    }
}

/// Render one scan with the software backend and write the displayed slice.
fn run_headless(
    config: &ViewerConfig,
    coordinator: &FetchCoordinator,
    session_store: Option<&SessionStore>,
    scan: &ResolvedScan,
    out: &Path,
    ticks: u32,
) -> Result<()> {
    let element = SurfaceElement::new(config.viewport_id.clone(), HEADLESS_SIZE, HEADLESS_SIZE);
    let mut shell = ViewerShell::mount_dicom(config, element, |_| Ok(SoftwareSurface::new()));
    let mut session = ScanSession::open(coordinator, scan.scan_id, scan.filename.as_deref());

    while !session.is_settled() {
        invalidate_on_unauthorized(session.poll().as_ref(), session_store);
        shell.set_props(session.props());
        thread::sleep(HEADLESS_POLL);
    }
    shell.set_props(session.props());

    loop {
        shell.update(Duration::ZERO);
        match shell.view() {
            ViewerView::Ready { .. } => break,
            ViewerView::Unavailable { reason } => bail!("scan unavailable: {reason}"),
            ViewerView::EngineFailed { message } => bail!("viewer error: {message}"),
            _ => thread::sleep(HEADLESS_POLL),
        }
    }

    shell.play()?;
    for _ in 0..ticks {
        shell.update(config.tick_interval());
    }

    if let ViewerView::Ready { playback, error, .. } = shell.view() {
        if let Some(error) = error {
            log::warn!("{error}");
        }
        log::info!(
            "Rendered slice {} / {} after {} tick{}",
            playback.current_index + 1,
            playback.total_slices,
            ticks,
            if ticks == 1 { "" } else { "s" }
        );
    }
    let frame = shell.current_frame().context("no frame to export")?;
    snapshot::save_png(frame, out)?;
    shell.unmount();
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = LaunchArgs::parse();

    let mut config = ViewerConfig::load();
    if let Some(server) = &args.server {
        config.server_url = server.clone();
    }
    if let Some(interval_ms) = args.interval_ms {
        config.tick_interval_ms = interval_ms;
    }

    let session_store = SessionStore::new();
    if let (Some(token), Some(store)) = (&args.token, &session_store) {
        store
            .store(token)
            .with_context(|| format!("failed to save session to {}", store.path().display()))?;
    }
    let token = args
        .token
        .clone()
        .or_else(|| session_store.as_ref().and_then(SessionStore::token));

    let transport: Arc<dyn ScanTransport> = Arc::new(ScanApi::new(&config.server_url, token));
    let coordinator = FetchCoordinator::new(transport, SessionCache::new());
    let mut local_ids = LocalIds::new();

    let initial = launch::resolve(
        &coordinator,
        &args.source(),
        &mut local_ids,
        args.export_mask.as_deref(),
    )
    .inspect_err(|e| {
        invalidate_on_unauthorized(e.downcast_ref::<FetchError>(), session_store.as_ref());
    })?;

    if let Some(out) = &args.headless {
        let scan = initial.context("--headless needs a scan to render")?;
        return run_headless(
            &config,
            &coordinator,
            session_store.as_ref(),
            &scan,
            out,
            args.ticks,
        );
    }

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = ScanviewApp {
        launch: Some(Launch {
            config,
            coordinator,
            session_store,
            initial,
            local_ids,
        }),
        app: None,
    };
    event_loop.run_app(&mut app)?;

    Ok(())
}
