use thiserror::Error;

use super::blob::BlobRegistry;
use super::parser::{self, tags, ParseError};
use super::types::{FrameId, FrameStack, RawContainer};

/// Declared frame counts above this are treated as corrupt.
pub const MAX_DECLARED_FRAMES: i64 = 1 << 16;

/// Why a container degraded to a single unqualified frame. Logged, never surfaced.
#[derive(Debug, Error)]
pub enum DecodeFallback {
    #[error("not a parseable DICOM file: {0}")]
    Parse(#[from] ParseError),
    #[error("number of frames is absent or unreadable")]
    MissingFrameCount,
    #[error("declared number of frames {0} is not usable")]
    InvalidFrameCount(i64),
}

/// Turns raw containers into frame stacks backed by a shell-owned blob registry.
pub struct ContainerDecoder {
    blobs: BlobRegistry,
}

impl ContainerDecoder {
    pub fn new(blobs: BlobRegistry) -> Self {
        Self { blobs }
    }

    /// Never fails: anything unparseable becomes a one-frame stack over the whole blob.
    pub fn decode(&self, container: &RawContainer) -> FrameStack {
        let lease = self.blobs.register(container.clone());
        let blob = lease.id();

        let ids = match declared_frames(container.bytes()) {
            Ok(n) => {
                log::info!(
                    "Decoded container: {:.2} MB, {} frame{}",
                    container.size_mb(),
                    n,
                    if n == 1 { "" } else { "s" }
                );
                (0..n).map(|k| FrameId { blob, frame: Some(k) }).collect()
            }
            Err(reason) => {
                log::warn!("Falling back to a single frame: {reason}");
                vec![FrameId { blob, frame: None }]
            }
        };

        FrameStack::new(ids, lease)
    }
}

fn declared_frames(bytes: &[u8]) -> Result<u32, DecodeFallback> {
    let dataset = parser::parse(bytes)?;
    let n = dataset
        .int_string(tags::NUMBER_OF_FRAMES)
        .ok_or(DecodeFallback::MissingFrameCount)?;
    if !(1..=MAX_DECLARED_FRAMES).contains(&n) {
        return Err(DecodeFallback::InvalidFrameCount(n));
    }
    Ok(n as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dicom::test_support::DicomBuilder;

    fn decode(bytes: Vec<u8>) -> (FrameStack, BlobRegistry) {
        let blobs = BlobRegistry::new();
        let decoder = ContainerDecoder::new(blobs.clone());
        (decoder.decode(&RawContainer::new(bytes)), blobs)
    }

    #[test]
    fn declared_frames_become_qualified_ids() {
        for n in [1u32, 2, 7, 24] {
            let (stack, _) = decode(DicomBuilder::explicit_le().grayscale8(2, 2, n).build());
            assert_eq!(stack.len(), n as usize);
            for (k, id) in stack.ids().iter().enumerate() {
                assert_eq!(id.frame, Some(k as u32));
                assert_eq!(id.blob, stack.blob());
            }
        }
    }

    #[test]
    fn empty_buffer_falls_back_to_one_frame() {
        let (stack, _) = decode(Vec::new());
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.ids()[0].frame, None);
    }

    #[test]
    fn garbage_falls_back_to_one_frame() {
        let (stack, _) = decode(vec![0xAB; 4096]);
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.ids()[0].frame, None);
    }

    #[test]
    fn truncated_file_falls_back_to_one_frame() {
        let mut bytes = DicomBuilder::explicit_le().grayscale8(8, 8, 4).build();
        bytes.truncate(bytes.len() - 3);
        let (stack, _) = decode(bytes);
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn missing_frame_count_falls_back() {
        let bytes = DicomBuilder::explicit_le()
            .grayscale8(2, 2, 1)
            .remove(tags::NUMBER_OF_FRAMES)
            .build();
        let (stack, _) = decode(bytes);
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.ids()[0].frame, None);
    }

    #[test]
    fn zero_negative_or_unreadable_counts_fall_back() {
        for value in ["0", "-3", "many", "99999999"] {
            let bytes = DicomBuilder::explicit_le()
                .grayscale8(2, 2, 1)
                .string(tags::NUMBER_OF_FRAMES, *b"IS", value)
                .build();
            let (stack, _) = decode(bytes);
            assert_eq!(stack.len(), 1, "value {value}");
        }
    }

    #[test]
    fn stack_owns_its_blob() {
        let (stack, blobs) = decode(DicomBuilder::explicit_le().grayscale8(2, 2, 3).build());
        let blob = stack.blob();
        assert!(blobs.resolve(blob).is_some());
        drop(stack);
        assert!(blobs.resolve(blob).is_none());
    }

    #[test]
    fn repeated_decodes_get_distinct_blobs() {
        let blobs = BlobRegistry::new();
        let decoder = ContainerDecoder::new(blobs.clone());
        let container = RawContainer::new(DicomBuilder::implicit_le().grayscale8(1, 1, 2).build());
        let a = decoder.decode(&container);
        let b = decoder.decode(&container);
        assert_ne!(a.blob(), b.blob());
        assert_eq!(blobs.live_count(), 2);
    }
}
