use thiserror::Error;

/// The rendering backend could not start. Fatal for the viewer instance.
#[derive(Debug, Clone, Error)]
pub enum EngineInitError {
    #[error("no compatible GPU adapter: {0}")]
    Adapter(String),
    #[error("failed to create rendering device: {0}")]
    Device(String),
    #[error("failed to create surface: {0}")]
    Surface(String),
}

/// A frame stack could not be resolved to pixels. The viewport stays usable.
#[derive(Debug, Clone, Error)]
pub enum FrameLoadError {
    #[error("blob {0} was released before its frames were loaded")]
    Revoked(u64),
    #[error("malformed container: {0}")]
    Malformed(String),
    #[error("frame {frame} is out of range ({available} available)")]
    FrameOutOfRange { frame: u32, available: u32 },
    #[error("pixel data truncated: need {needed} bytes at offset {offset}, have {len}")]
    Truncated { offset: usize, needed: usize, len: usize },
    #[error("unsupported pixel format: {0}")]
    Unsupported(String),
    #[error("failed to decode compressed frame: {0}")]
    Codec(String),
    #[error("stack load cancelled")]
    Cancelled,
}

/// The scan store could not deliver a file or its metadata.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("session expired, sign in again")]
    Unauthorized,
    #[error("server responded with HTTP {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to read response body: {0}")]
    Body(String),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("fetch cancelled")]
    Cancelled,
}

/// Misuse of the engine or shell, usually an ordering problem.
#[derive(Debug, Clone, Error)]
pub enum ViewerError {
    #[error("rendering engine used after teardown")]
    UseAfterTeardown,
    #[error("viewport {0} has a stack load in flight")]
    LoadInFlight(String),
    #[error("no viewport named {0}")]
    UnknownViewport(String),
    #[error("slice index {index} out of range for {total} slices")]
    IndexOutOfRange { index: usize, total: usize },
    #[error("viewer is not ready")]
    NotReady,
    #[error("render failed: {0}")]
    Render(String),
}
