use std::fmt;
use std::sync::Arc;

use super::blob::{BlobId, BlobLease};

/// One uploaded or fetched file, shared without copying.
#[derive(Clone)]
pub struct RawContainer(Arc<[u8]>);

impl RawContainer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when both handles point at the same allocation (not merely equal bytes).
    pub fn same_buffer(&self, other: &RawContainer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn size_mb(&self) -> f64 {
        self.0.len() as f64 / 1024.0 / 1024.0
    }
}

impl From<Vec<u8>> for RawContainer {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl fmt::Debug for RawContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawContainer({} bytes)", self.0.len())
    }
}

/// A decoded frame ready for upload or blit.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub data: Vec<u8>, // RGBA8
    pub width: u32,
    pub height: u32,
}

impl DecodedFrame {
    pub fn black(width: u32, height: u32) -> Self {
        let mut data = vec![0u8; (width as usize) * (height as usize) * 4];
        for px in data.chunks_exact_mut(4) {
            px[3] = 255;
        }
        Self { data, width, height }
    }
}

/// Opaque reference to one frame of a registered blob.
///
/// `frame: None` addresses the whole container as a single image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId {
    pub blob: BlobId,
    pub frame: Option<u32>,
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scan:blob/{}", self.blob.0)?;
        if let Some(frame) = self.frame {
            write!(f, "&frame={frame}")?;
        }
        Ok(())
    }
}

/// Ordered, non-empty list of frame ids for one container.
///
/// Owns the lease on the backing blob: dropping the stack revokes it.
#[derive(Debug)]
pub struct FrameStack {
    ids: Vec<FrameId>,
    lease: BlobLease,
}

impl FrameStack {
    pub(super) fn new(ids: Vec<FrameId>, lease: BlobLease) -> Self {
        debug_assert!(!ids.is_empty());
        Self { ids, lease }
    }

    pub fn ids(&self) -> &[FrameId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn blob(&self) -> BlobId {
        self.lease.id()
    }
}
