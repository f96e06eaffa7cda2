use std::sync::Arc;
use std::time::Duration;

use super::playback::{PlaybackController, PlaybackState, SliceTarget};
use crate::dicom::{
    BlobRegistry, ContainerDecoder, DecodedFrame, DicomFrameResolver, FrameResolver, FrameStack,
    RawContainer,
};
use crate::error::{EngineInitError, ViewerError};
use crate::render::{RenderBackend, RenderingEngine, StackLoad, SurfaceElement, ViewportHandle};
use crate::settings::ViewerConfig;

/// Inputs from the page that owns the viewer.
#[derive(Debug, Clone)]
pub struct ShellProps {
    pub scan_file: Option<RawContainer>,
    /// 0 to 100.
    pub loading_progress: u8,
    pub is_scan_loading: bool,
    pub fetch_error: Option<String>,
}

impl Default for ShellProps {
    fn default() -> Self {
        Self {
            scan_file: None,
            loading_progress: 0,
            is_scan_loading: true,
            fetch_error: None,
        }
    }
}

impl ShellProps {
    pub fn with_file(container: RawContainer) -> Self {
        Self {
            scan_file: Some(container),
            loading_progress: 100,
            is_scan_loading: false,
            fetch_error: None,
        }
    }
}

/// What the viewer shows, in precedence order.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerView {
    ServerLoading { progress: u8 },
    Unavailable { reason: String },
    EngineFailed { message: String },
    Rendering,
    Ready {
        playback: PlaybackState,
        controls_enabled: bool,
        error: Option<String>,
    },
    Unmounted,
}

const NO_SCAN_FILE: &str = "Scan file is not available";

/// Adapts one engine viewport to the playback controller.
struct BoundViewport<'a, B: RenderBackend> {
    engine: &'a mut RenderingEngine<B>,
    handle: &'a ViewportHandle,
}

impl<B: RenderBackend> SliceTarget for BoundViewport<'_, B> {
    fn set_index(&mut self, index: usize) -> Result<(), ViewerError> {
        self.engine.set_index(self.handle, index)
    }

    fn redraw(&mut self) -> Result<(), ViewerError> {
        self.engine.redraw(self.handle)
    }
}

/// Composition root: owns the engine, the single viewport, playback and the
/// blob registry behind the current stack.
pub struct ViewerShell<B: RenderBackend> {
    viewport_id: String,
    element: SurfaceElement,
    engine: Option<RenderingEngine<B>>,
    engine_error: Option<EngineInitError>,
    viewport: Option<ViewportHandle>,
    blobs: BlobRegistry,
    decoder: ContainerDecoder,
    resolver: Arc<dyn FrameResolver>,
    props: ShellProps,
    current_file: Option<RawContainer>,
    stack: Option<FrameStack>,
    pending: Option<(FrameStack, StackLoad)>,
    playback: PlaybackController,
    banner: Option<String>,
    mounted: bool,
}

impl<B: RenderBackend> ViewerShell<B> {
    /// Mount with the DICOM resolver.
    pub fn mount_dicom(
        config: &ViewerConfig,
        element: SurfaceElement,
        factory: impl FnOnce(&SurfaceElement) -> Result<B, EngineInitError>,
    ) -> Self {
        Self::mount(
            config,
            element,
            |blobs| Arc::new(DicomFrameResolver::new(blobs)),
            factory,
        )
    }

    /// Build the engine through `factory` and enable the viewport. An engine
    /// failure leaves the shell mounted in the failed state.
    pub fn mount(
        config: &ViewerConfig,
        element: SurfaceElement,
        resolver: impl FnOnce(BlobRegistry) -> Arc<dyn FrameResolver>,
        factory: impl FnOnce(&SurfaceElement) -> Result<B, EngineInitError>,
    ) -> Self {
        let blobs = BlobRegistry::new();
        let mut shell = Self {
            viewport_id: config.viewport_id.clone(),
            element,
            engine: None,
            engine_error: None,
            viewport: None,
            decoder: ContainerDecoder::new(blobs.clone()),
            resolver: resolver(blobs.clone()),
            blobs,
            props: ShellProps::default(),
            current_file: None,
            stack: None,
            pending: None,
            playback: PlaybackController::new(config.tick_interval()),
            banner: None,
            mounted: true,
        };

        let viewport_id = shell.viewport_id.clone();
        let element = shell.element.clone();
        let enabled = shell
            .initialize_engine(factory)
            .map(|engine| engine.enable_element(&viewport_id, element));
        match enabled {
            Ok(Ok(handle)) => shell.viewport = Some(handle),
            Ok(Err(e)) => log::error!("Failed to enable viewport: {e}"),
            Err(e) => {
                log::error!("Rendering engine unavailable: {e}");
                shell.engine_error = Some(e);
            }
        }
        shell
    }

    /// Reuses the engine if one exists.
    fn initialize_engine(
        &mut self,
        factory: impl FnOnce(&SurfaceElement) -> Result<B, EngineInitError>,
    ) -> Result<&mut RenderingEngine<B>, EngineInitError> {
        if self.engine.is_none() {
            let backend = factory(&self.element)?;
            self.engine = Some(RenderingEngine::new(backend));
        }
        self.engine
            .as_mut()
            .ok_or_else(|| EngineInitError::Device("engine missing after init".into()))
    }

    #[cfg(test)]
    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn engine(&self) -> Option<&RenderingEngine<B>> {
        self.engine.as_ref()
    }

    pub fn blobs(&self) -> &BlobRegistry {
        &self.blobs
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.playback.state()
    }

    pub fn set_props(&mut self, props: ShellProps) {
        if !self.mounted {
            return;
        }
        if let Some(file) = &props.scan_file {
            let is_new = self
                .current_file
                .as_ref()
                .is_none_or(|current| !current.same_buffer(file));
            if is_new {
                let file = file.clone();
                self.load(file);
            }
        }
        self.props = props;
    }

    fn load(&mut self, file: RawContainer) {
        self.playback.pause();
        self.banner = None;
        self.current_file = Some(file.clone());

        let (Some(engine), Some(handle)) = (self.engine.as_mut(), self.viewport.as_ref()) else {
            return;
        };
        if let Some((_, job)) = self.pending.take() {
            job.cancel();
            let _ = engine.abort_load_stack(handle);
        }

        let stack = self.decoder.decode(&file);
        match engine.begin_load_stack(handle, &stack, Arc::clone(&self.resolver)) {
            Ok(job) => self.pending = Some((stack, job)),
            Err(e) => {
                log::error!("Could not start stack load: {e}");
                self.banner = Some(e.to_string());
            }
        }
    }

    /// Run once per event-loop iteration.
    pub fn update(&mut self, dt: Duration) {
        if !self.mounted {
            return;
        }
        self.poll_stack_load();
        if self.is_ready() {
            if let Err(e) = self.with_target(|playback, target| playback.advance(dt, target)) {
                self.banner = Some(e.to_string());
            }
        }
    }

    fn poll_stack_load(&mut self) {
        let Some(result) = self.pending.as_ref().and_then(|(_, job)| job.poll()) else {
            return;
        };
        let Some((stack, _job)) = self.pending.take() else {
            return;
        };
        let (Some(engine), Some(handle)) = (self.engine.as_mut(), self.viewport.as_ref()) else {
            return;
        };

        match result {
            Ok(frames) => match engine.finish_load_stack(handle, frames) {
                Ok(total) => {
                    // Swapped together so no observer sees an index past the new stack.
                    self.stack = Some(stack);
                    self.resolver.prune();
                    self.playback.attach(total);
                    if let Err(e) = engine.redraw(handle) {
                        log::warn!("First redraw of the new stack failed: {e}");
                        self.banner = Some(e.to_string());
                    }
                }
                Err(e) => self.banner = Some(e.to_string()),
            },
            Err(e) => {
                let _ = engine.abort_load_stack(handle);
                if let Err(redraw) = engine.redraw(handle) {
                    log::debug!("Redraw after failed load: {redraw}");
                }
                self.banner = Some(e.to_string());
            }
        }
    }

    fn is_ready(&self) -> bool {
        self.mounted
            && self.engine.is_some()
            && self.viewport.is_some()
            && self.current_file.is_some()
            && self.pending.is_none()
    }

    pub fn view(&self) -> ViewerView {
        if !self.mounted {
            return ViewerView::Unmounted;
        }
        if self.props.scan_file.is_none() {
            if self.props.is_scan_loading {
                return ViewerView::ServerLoading {
                    progress: self.props.loading_progress.min(100),
                };
            }
            return ViewerView::Unavailable {
                reason: self
                    .props
                    .fetch_error
                    .clone()
                    .unwrap_or_else(|| NO_SCAN_FILE.to_string()),
            };
        }
        if let Some(e) = &self.engine_error {
            return ViewerView::EngineFailed {
                message: e.to_string(),
            };
        }
        if !self.is_ready() {
            return ViewerView::Rendering;
        }
        let playback = self.playback.state();
        ViewerView::Ready {
            playback,
            controls_enabled: playback.total_slices > 1,
            error: self.banner.clone(),
        }
    }

    fn with_target<R>(
        &mut self,
        f: impl FnOnce(&mut PlaybackController, &mut dyn SliceTarget) -> Result<R, ViewerError>,
    ) -> Result<R, ViewerError> {
        if !self.is_ready() {
            return Err(ViewerError::NotReady);
        }
        let (Some(engine), Some(handle)) = (self.engine.as_mut(), self.viewport.as_ref()) else {
            return Err(ViewerError::NotReady);
        };
        let mut target = BoundViewport { engine, handle };
        f(&mut self.playback, &mut target)
    }

    pub fn play(&mut self) -> Result<(), ViewerError> {
        self.with_target(|playback, _| {
            playback.play();
            Ok(())
        })
    }

    pub fn pause(&mut self) -> Result<(), ViewerError> {
        self.with_target(|playback, _| {
            playback.pause();
            Ok(())
        })
    }

    pub fn toggle_play(&mut self) -> Result<(), ViewerError> {
        self.with_target(|playback, _| {
            playback.toggle();
            Ok(())
        })
    }

    pub fn seek(&mut self, index: usize) -> Result<(), ViewerError> {
        self.with_target(|playback, target| playback.seek(index, target))
    }

    pub fn step(&mut self, delta: isize) -> Result<(), ViewerError> {
        self.with_target(|playback, target| playback.step(delta, target))
    }

    pub fn first(&mut self) -> Result<(), ViewerError> {
        self.with_target(|playback, target| playback.first(target))
    }

    pub fn last(&mut self) -> Result<(), ViewerError> {
        self.with_target(|playback, target| playback.last(target))
    }

    /// Rebind the viewport to a resized element and redraw.
    pub fn resize(&mut self, width: u32, height: u32) {
        if !self.mounted {
            return;
        }
        self.element = SurfaceElement::new(self.element.name.clone(), width, height);
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        match engine.enable_element(&self.viewport_id, self.element.clone()) {
            Ok(handle) => {
                if self.pending.is_none() {
                    if let Err(e) = engine.redraw(&handle) {
                        log::warn!("Redraw after resize failed: {e}");
                    }
                }
                self.viewport = Some(handle);
            }
            Err(e) => log::warn!("Resize failed: {e}"),
        }
    }

    /// Present the current frame again, e.g. after the window was exposed.
    pub fn redraw(&mut self) {
        if !self.mounted || self.pending.is_some() {
            return;
        }
        let (Some(engine), Some(handle)) = (self.engine.as_mut(), self.viewport.as_ref()) else {
            return;
        };
        if let Err(e) = engine.redraw(handle) {
            log::warn!("Redraw failed: {e}");
        }
    }

    /// The frame currently on screen, for snapshots.
    pub fn current_frame(&self) -> Option<&DecodedFrame> {
        let handle = self.viewport.as_ref()?;
        self.engine.as_ref()?.current_frame(handle)
    }

    /// Cancel playback and pending work, tear the engine down, release the blob.
    /// Safe to call more than once.
    pub fn unmount(&mut self) {
        if !self.mounted {
            return;
        }
        self.mounted = false;
        self.playback.cancel();
        if let Some((_, job)) = self.pending.take() {
            job.cancel();
        }
        if let Some(engine) = self.engine.as_mut() {
            if let Err(e) = engine.teardown() {
                log::warn!("Engine teardown: {e}");
            }
        }
        self.stack = None;
        self.current_file = None;
        self.resolver.prune();
        let live = self.blobs.live_count();
        if live > 0 {
            log::warn!(
                "Viewer unmounted with {} blob{} still registered",
                live,
                if live == 1 { "" } else { "s" }
            );
        } else {
            log::info!("Viewer unmounted");
        }
    }
}

impl<B: RenderBackend> Drop for ViewerShell<B> {
    fn drop(&mut self) {
        self.unmount();
    }
}
