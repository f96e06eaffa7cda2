use std::collections::HashMap;
use std::sync::Arc;

use super::backend::RenderBackend;
use super::stack_load::StackLoad;
use super::viewport::{SurfaceElement, Viewport, ViewportHandle};
use crate::dicom::{DecodedFrame, FrameResolver, FrameStack};
use crate::error::ViewerError;

/// Owns one backend and the named viewports drawing through it.
///
/// Exclusively owned by a single viewer shell. After `teardown` every call
/// fails with `UseAfterTeardown`.
pub struct RenderingEngine<B: RenderBackend> {
    backend: Option<B>,
    viewports: HashMap<String, Viewport>,
}

impl<B: RenderBackend> RenderingEngine<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Some(backend),
            viewports: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn is_torn_down(&self) -> bool {
        self.backend.is_none()
    }

    pub fn backend(&self) -> Option<&B> {
        self.backend.as_ref()
    }

    fn ensure_live(&self) -> Result<(), ViewerError> {
        if self.backend.is_none() {
            return Err(ViewerError::UseAfterTeardown);
        }
        Ok(())
    }

    fn viewport(&self, handle: &ViewportHandle) -> Result<&Viewport, ViewerError> {
        self.ensure_live()?;
        self.viewports
            .get(handle.id())
            .ok_or_else(|| ViewerError::UnknownViewport(handle.id().to_string()))
    }

    fn viewport_mut(&mut self, handle: &ViewportHandle) -> Result<&mut Viewport, ViewerError> {
        self.ensure_live()?;
        self.viewports
            .get_mut(handle.id())
            .ok_or_else(|| ViewerError::UnknownViewport(handle.id().to_string()))
    }

    /// Bind `element` to the viewport named `viewport_id`, reusing it if it already exists.
    pub fn enable_element(
        &mut self,
        viewport_id: &str,
        element: SurfaceElement,
    ) -> Result<ViewportHandle, ViewerError> {
        self.ensure_live()?;
        match self.viewports.get_mut(viewport_id) {
            Some(existing) => existing.element = element,
            None => {
                log::debug!(
                    "Viewport '{}' enabled on '{}' ({}x{})",
                    viewport_id,
                    element.name,
                    element.width,
                    element.height
                );
                self.viewports
                    .insert(viewport_id.to_string(), Viewport::new(element));
            }
        }
        Ok(ViewportHandle::new(viewport_id))
    }

    #[cfg(test)]
    pub fn viewport_count(&self) -> usize {
        self.viewports.len()
    }

    /// Start resolving `stack` on a worker. The viewport refuses index changes
    /// and redraws until `finish_load_stack` or `abort_load_stack`.
    pub fn begin_load_stack(
        &mut self,
        handle: &ViewportHandle,
        stack: &FrameStack,
        resolver: Arc<dyn FrameResolver>,
    ) -> Result<StackLoad, ViewerError> {
        let viewport = self.viewport_mut(handle)?;
        if viewport.loading {
            return Err(ViewerError::LoadInFlight(handle.id().to_string()));
        }
        viewport.loading = true;
        Ok(StackLoad::spawn(handle.id(), stack.ids().to_vec(), resolver))
    }

    /// Install resolved frames at index 0 and return how many there are.
    /// The caller redraws; a failed present does not undo the install.
    pub fn finish_load_stack(
        &mut self,
        handle: &ViewportHandle,
        frames: Vec<DecodedFrame>,
    ) -> Result<usize, ViewerError> {
        let viewport = self.viewport_mut(handle)?;
        log::info!(
            "Stack attached to '{}': {} frame{}",
            handle.id(),
            frames.len(),
            if frames.len() == 1 { "" } else { "s" }
        );
        viewport.frames = frames;
        viewport.index = 0;
        viewport.loading = false;
        Ok(viewport.frames.len())
    }

    /// Give up on a pending load. Previously attached frames stay.
    pub fn abort_load_stack(&mut self, handle: &ViewportHandle) -> Result<(), ViewerError> {
        self.viewport_mut(handle)?.loading = false;
        Ok(())
    }

    /// Select the displayed frame. Does not redraw.
    pub fn set_index(&mut self, handle: &ViewportHandle, index: usize) -> Result<(), ViewerError> {
        let viewport = self.viewport_mut(handle)?;
        if viewport.loading {
            return Err(ViewerError::LoadInFlight(handle.id().to_string()));
        }
        let total = viewport.frames.len().max(1);
        if index >= total {
            return Err(ViewerError::IndexOutOfRange { index, total });
        }
        viewport.index = index;
        Ok(())
    }

    pub fn redraw(&mut self, handle: &ViewportHandle) -> Result<(), ViewerError> {
        self.ensure_live()?;
        let viewport = self
            .viewports
            .get(handle.id())
            .ok_or_else(|| ViewerError::UnknownViewport(handle.id().to_string()))?;
        if viewport.loading {
            return Err(ViewerError::LoadInFlight(handle.id().to_string()));
        }
        match self.backend.as_mut() {
            Some(backend) => backend.present(&viewport.element, viewport.current_frame()),
            None => Err(ViewerError::UseAfterTeardown),
        }
    }

    #[cfg(test)]
    pub fn index(&self, handle: &ViewportHandle) -> Result<usize, ViewerError> {
        Ok(self.viewport(handle)?.index)
    }

    pub fn frame_count(&self, handle: &ViewportHandle) -> Result<usize, ViewerError> {
        Ok(self.viewport(handle)?.frames.len())
    }

    pub fn current_frame(&self, handle: &ViewportHandle) -> Option<&DecodedFrame> {
        self.viewport(handle).ok()?.current_frame()
    }

    /// Release the backend and every viewport. Exactly once.
    pub fn teardown(&mut self) -> Result<(), ViewerError> {
        let mut backend = self.backend.take().ok_or(ViewerError::UseAfterTeardown)?;
        backend.release();
        let count = self.viewports.len();
        self.viewports.clear();
        log::info!(
            "Rendering engine torn down ({} viewport{})",
            count,
            if count == 1 { "" } else { "s" }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dicom::test_support::DicomBuilder;
    use crate::dicom::{BlobRegistry, ContainerDecoder, DicomFrameResolver, RawContainer};
    use crate::error::FrameLoadError;
    use crate::render::backend::SoftwareSurface;

    struct Fixture {
        engine: RenderingEngine<SoftwareSurface>,
        handle: ViewportHandle,
        decoder: ContainerDecoder,
        resolver: Arc<dyn FrameResolver>,
    }

    fn fixture() -> Fixture {
        let blobs = BlobRegistry::new();
        let mut engine = RenderingEngine::new(SoftwareSurface::new());
        let handle = engine
            .enable_element("main", SurfaceElement::new("canvas", 16, 16))
            .unwrap();
        Fixture {
            engine,
            handle,
            decoder: ContainerDecoder::new(blobs.clone()),
            resolver: Arc::new(DicomFrameResolver::new(blobs)),
        }
    }

    fn load(f: &mut Fixture, bytes: Vec<u8>) -> Result<(), FrameLoadError> {
        let stack = f.decoder.decode(&RawContainer::new(bytes));
        let job = f
            .engine
            .begin_load_stack(&f.handle, &stack, Arc::clone(&f.resolver))
            .unwrap();
        match job.wait() {
            Ok(frames) => {
                f.engine.finish_load_stack(&f.handle, frames).unwrap();
                f.engine.redraw(&f.handle).unwrap();
                Ok(())
            }
            Err(e) => {
                f.engine.abort_load_stack(&f.handle).unwrap();
                Err(e)
            }
        }
    }

    #[test]
    fn enabling_the_same_viewport_twice_reuses_it() {
        let mut f = fixture();
        let again = f
            .engine
            .enable_element("main", SurfaceElement::new("canvas", 32, 8))
            .unwrap();
        assert_eq!(again, f.handle);
        assert_eq!(f.engine.viewport_count(), 1);
    }

    #[test]
    fn load_attaches_frames_and_redraws_first() {
        let mut f = fixture();
        load(&mut f, DicomBuilder::explicit_le().grayscale8(4, 4, 5).build()).unwrap();
        assert_eq!(f.engine.frame_count(&f.handle).unwrap(), 5);
        assert_eq!(f.engine.index(&f.handle).unwrap(), 0);
        assert_eq!(f.engine.backend().unwrap().presents(), 1);
    }

    #[test]
    fn set_index_does_not_redraw() {
        let mut f = fixture();
        load(&mut f, DicomBuilder::explicit_le().grayscale8(4, 4, 3).build()).unwrap();
        f.engine.set_index(&f.handle, 2).unwrap();
        assert_eq!(f.engine.backend().unwrap().presents(), 1);
        f.engine.redraw(&f.handle).unwrap();
        assert_eq!(f.engine.backend().unwrap().presents(), 2);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut f = fixture();
        load(&mut f, DicomBuilder::explicit_le().grayscale8(4, 4, 3).build()).unwrap();
        assert!(matches!(
            f.engine.set_index(&f.handle, 3),
            Err(ViewerError::IndexOutOfRange { index: 3, total: 3 })
        ));
    }

    #[test]
    fn index_changes_wait_for_pending_load() {
        let mut f = fixture();
        let stack = f
            .decoder
            .decode(&RawContainer::new(DicomBuilder::explicit_le().grayscale8(2, 2, 2).build()));
        let job = f
            .engine
            .begin_load_stack(&f.handle, &stack, Arc::clone(&f.resolver))
            .unwrap();
        assert!(matches!(f.engine.set_index(&f.handle, 0), Err(ViewerError::LoadInFlight(_))));
        assert!(matches!(f.engine.redraw(&f.handle), Err(ViewerError::LoadInFlight(_))));
        assert!(matches!(
            f.engine.begin_load_stack(&f.handle, &stack, Arc::clone(&f.resolver)),
            Err(ViewerError::LoadInFlight(_))
        ));
        let frames = job.wait().unwrap();
        assert_eq!(f.engine.finish_load_stack(&f.handle, frames).unwrap(), 2);
        f.engine.set_index(&f.handle, 1).unwrap();
    }

    #[test]
    fn failed_load_keeps_previous_frames() {
        let mut f = fixture();
        load(&mut f, DicomBuilder::explicit_le().grayscale8(4, 4, 3).build()).unwrap();
        f.engine.set_index(&f.handle, 2).unwrap();

        let err = load(&mut f, vec![0xFF; 64]).unwrap_err();
        assert!(matches!(err, FrameLoadError::Malformed(_)));
        assert_eq!(f.engine.frame_count(&f.handle).unwrap(), 3);
        assert_eq!(f.engine.index(&f.handle).unwrap(), 2);
        f.engine.redraw(&f.handle).unwrap();
    }

    #[test]
    fn teardown_happens_once() {
        let mut f = fixture();
        f.engine.teardown().unwrap();
        assert!(f.engine.is_torn_down());
        assert!(matches!(f.engine.teardown(), Err(ViewerError::UseAfterTeardown)));
        assert!(matches!(f.engine.redraw(&f.handle), Err(ViewerError::UseAfterTeardown)));
        assert!(matches!(f.engine.set_index(&f.handle, 0), Err(ViewerError::UseAfterTeardown)));
        assert!(matches!(
            f.engine.enable_element("main", SurfaceElement::new("canvas", 1, 1)),
            Err(ViewerError::UseAfterTeardown)
        ));
    }

    #[test]
    fn unknown_viewport_is_reported() {
        let mut f = fixture();
        let other = ViewportHandle::new("other");
        assert!(matches!(f.engine.redraw(&other), Err(ViewerError::UnknownViewport(_))));
    }
}
