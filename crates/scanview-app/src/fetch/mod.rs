pub mod cache;
pub mod client;
pub mod coordinator;
pub mod types;

pub use cache::SessionCache;
pub use client::{ScanApi, ScanTransport};
pub use coordinator::{FetchCoordinator, FetchJob, FetchStart};
pub use types::ScanInfo;
