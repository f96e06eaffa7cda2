pub mod backend;
pub mod engine;
pub mod stack_load;
pub mod viewport;

pub use backend::{letterbox, Letterbox, RenderBackend, SoftwareSurface};
pub use engine::RenderingEngine;
pub use stack_load::StackLoad;
pub use viewport::{SurfaceElement, ViewportHandle};
