pub mod blob;
pub mod decoder;
pub mod parser;
pub mod pixels;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use blob::{BlobId, BlobRegistry};
pub use decoder::ContainerDecoder;
pub use pixels::{DicomFrameResolver, FrameResolver};
pub use types::{DecodedFrame, FrameId, FrameStack, RawContainer};
