pub mod playback;
pub mod session;
pub mod shell;

pub use playback::PlaybackState;
pub use session::ScanSession;
pub use shell::{ShellProps, ViewerShell, ViewerView};
