pub mod context;
pub mod fullscreen_quad;
pub mod slice_blit;
pub mod surface;

pub use surface::GpuSurface;
