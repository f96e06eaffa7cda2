use bytemuck::{Pod, Zeroable};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use super::viewport::SurfaceElement;
use crate::dicom::DecodedFrame;
use crate::error::ViewerError;

/// Where frames end up. One backend per engine.
pub trait RenderBackend {
    /// Draw `frame` letterboxed into `element`, or clear it when there is nothing to show.
    fn present(&mut self, element: &SurfaceElement, frame: Option<&DecodedFrame>)
    -> Result<(), ViewerError>;

    /// Free native resources. Called once, by engine teardown.
    fn release(&mut self);
}

/// Scale and offset of the fitted frame in normalized surface coordinates.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Letterbox {
    pub scale: [f32; 2],
    pub offset: [f32; 2],
}

impl Letterbox {
    /// The fitted frame's rectangle in surface pixels: `(x, y, width, height)`.
    pub fn pixel_rect(&self, surface_w: u32, surface_h: u32) -> (u32, u32, u32, u32) {
        let w = ((self.scale[0] * surface_w as f32).round() as u32).clamp(1, surface_w.max(1));
        let h = ((self.scale[1] * surface_h as f32).round() as u32).clamp(1, surface_h.max(1));
        ((surface_w - w) / 2, (surface_h - h) / 2, w, h)
    }
}

/// Fit a `frame_w`x`frame_h` image into the surface, keeping aspect, centered.
pub fn letterbox(frame_w: u32, frame_h: u32, surface_w: u32, surface_h: u32) -> Letterbox {
    let frame_aspect = frame_w as f32 / frame_h.max(1) as f32;
    let surface_aspect = surface_w as f32 / surface_h.max(1) as f32;

    let (scale_x, scale_y) = if frame_aspect > surface_aspect {
        // Wider than the surface: bars top and bottom
        (1.0, surface_aspect / frame_aspect)
    } else {
        (frame_aspect / surface_aspect, 1.0)
    };

    Letterbox {
        scale: [scale_x, scale_y],
        offset: [(1.0 - scale_x) * 0.5, (1.0 - scale_y) * 0.5],
    }
}

/// CPU backend drawing into an in-memory canvas. Used headless and in tests.
pub struct SoftwareSurface {
    canvas: RgbaImage,
    presents: usize,
    released: bool,
}

impl SoftwareSurface {
    pub fn new() -> Self {
        Self {
            canvas: RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255])),
            presents: 0,
            released: false,
        }
    }

    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    pub fn presents(&self) -> usize {
        self.presents
    }

    #[cfg(test)]
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Default for SoftwareSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderBackend for SoftwareSurface {
    fn present(
        &mut self,
        element: &SurfaceElement,
        frame: Option<&DecodedFrame>,
    ) -> Result<(), ViewerError> {
        if self.released {
            return Err(ViewerError::UseAfterTeardown);
        }

        let mut canvas = RgbaImage::from_pixel(element.width, element.height, Rgba([0, 0, 0, 255]));
        if let Some(frame) = frame {
            let source = RgbaImage::from_raw(frame.width, frame.height, frame.data.clone())
                .ok_or_else(|| {
                    ViewerError::Render(format!(
                        "frame buffer of {} bytes does not fit {}x{}",
                        frame.data.len(),
                        frame.width,
                        frame.height
                    ))
                })?;
            let (x, y, w, h) = letterbox(frame.width, frame.height, element.width, element.height)
                .pixel_rect(element.width, element.height);
            let scaled = imageops::resize(&source, w, h, FilterType::Triangle);
            imageops::overlay(&mut canvas, &scaled, i64::from(x), i64::from(y));
        }

        self.canvas = canvas;
        self.presents += 1;
        Ok(())
    }

    fn release(&mut self) {
        self.released = true;
        log::debug!("Software surface released after {} presents", self.presents);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_frames_get_bars_top_and_bottom() {
        let lb = letterbox(200, 100, 100, 100);
        assert_eq!(lb.scale, [1.0, 0.5]);
        assert_eq!(lb.offset, [0.0, 0.25]);
        assert_eq!(lb.pixel_rect(100, 100), (0, 25, 100, 50));
    }

    #[test]
    fn tall_frames_get_bars_left_and_right() {
        let lb = letterbox(50, 100, 200, 100);
        assert_eq!(lb.scale, [0.25, 1.0]);
        assert_eq!(lb.pixel_rect(200, 100), (75, 0, 50, 100));
    }

    #[test]
    fn matching_aspect_fills_the_surface() {
        let lb = letterbox(512, 512, 300, 300);
        assert_eq!(lb.scale, [1.0, 1.0]);
        assert_eq!(lb.offset, [0.0, 0.0]);
    }

    #[test]
    fn software_present_letterboxes_the_frame() {
        let mut surface = SoftwareSurface::new();
        let frame = DecodedFrame {
            data: vec![255; 2 * 4],
            width: 2,
            height: 1,
        };
        let element = SurfaceElement::new("test", 4, 4);
        surface.present(&element, Some(&frame)).unwrap();

        let canvas = surface.canvas();
        assert_eq!(canvas.dimensions(), (4, 4));
        assert_eq!(canvas.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(canvas.get_pixel(0, 1).0, [255, 255, 255, 255]);
        assert_eq!(canvas.get_pixel(3, 2).0, [255, 255, 255, 255]);
        assert_eq!(canvas.get_pixel(3, 3).0, [0, 0, 0, 255]);
        assert_eq!(surface.presents(), 1);
    }

    #[test]
    fn present_without_frame_clears() {
        let mut surface = SoftwareSurface::new();
        surface.present(&SurfaceElement::new("test", 3, 2), None).unwrap();
        assert!(surface.canvas().pixels().all(|p| p.0 == [0, 0, 0, 255]));
    }

    #[test]
    fn mismatched_buffer_is_a_render_error() {
        let mut surface = SoftwareSurface::new();
        let frame = DecodedFrame {
            data: vec![0; 3],
            width: 2,
            height: 2,
        };
        let result = surface.present(&SurfaceElement::new("test", 2, 2), Some(&frame));
        assert!(matches!(result, Err(ViewerError::Render(_))));
    }

    #[test]
    fn released_surface_refuses_to_present() {
        let mut surface = SoftwareSurface::new();
        surface.release();
        assert!(surface.is_released());
        let result = surface.present(&SurfaceElement::new("test", 2, 2), None);
        assert!(matches!(result, Err(ViewerError::UseAfterTeardown)));
    }
}
