use std::sync::Arc;

use winit::window::Window;

use super::context::GpuContext;
use super::slice_blit::SliceBlit;
use crate::dicom::DecodedFrame;
use crate::error::{EngineInitError, ViewerError};
use crate::render::{RenderBackend, SurfaceElement};

/// Window-backed rendering surface. Resources live until `release`.
pub struct GpuSurface {
    resources: Option<(GpuContext, SliceBlit)>,
}

impl GpuSurface {
    pub fn new(window: Arc<Window>) -> Result<Self, EngineInitError> {
        let gpu = GpuContext::new(window)?;
        let blit = SliceBlit::new(&gpu.device, gpu.format);
        Ok(Self {
            resources: Some((gpu, blit)),
        })
    }
}

impl RenderBackend for GpuSurface {
    fn present(
        &mut self,
        element: &SurfaceElement,
        frame: Option<&DecodedFrame>,
    ) -> Result<(), ViewerError> {
        let Some((gpu, blit)) = self.resources.as_mut() else {
            return Err(ViewerError::UseAfterTeardown);
        };

        if gpu.size() != (element.width, element.height) {
            gpu.resize(element.width, element.height);
        }
        let (width, height) = gpu.size();
        match frame {
            Some(frame) => blit.upload(&gpu.device, &gpu.queue, frame, width, height),
            None => blit.clear_slice(),
        }

        let output = match gpu.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                gpu.reconfigure();
                gpu.surface
                    .get_current_texture()
                    .map_err(|e| ViewerError::Render(e.to_string()))?
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::debug!("Surface timed out; skipping frame");
                return Ok(());
            }
            Err(e) => return Err(ViewerError::Render(e.to_string())),
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("slice-present"),
            });
        blit.draw(&mut encoder, &view);
        gpu.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }

    fn release(&mut self) {
        if self.resources.take().is_some() {
            log::info!("GPU surface released");
        }
    }
}
