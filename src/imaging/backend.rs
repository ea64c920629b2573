//! Encode primitive trait and shared types.
//!
//! The [`ImageBackend`] trait defines the two operations the converter needs
//! from a codec: identify (native size from the header) and encode (decode,
//! resize to the planned size, encode to the target format).
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate. Tests use `MockBackend`, which never touches pixels.

use super::params::{EncodeParams, OutputFormat};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unreadable image: {0}")]
    Decode(String),
    #[error("Unsupported output: {0}")]
    UnsupportedFormat(String),
    #[error("Encoding failed: {0}")]
    EncodeFailed(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Bytes produced by an encode, tagged with what was actually written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
}

/// Trait for image codec backends.
///
/// Implementations must report the format they really produced in
/// [`EncodedImage::format`]; the converter rejects a silent fallback.
pub trait ImageBackend: Sync {
    /// Get native image dimensions without a full decode where possible.
    fn identify(&self, source: &[u8]) -> Result<Dimensions, BackendError>;

    /// Decode `source`, resize to the requested size, and encode.
    fn encode(&self, source: &[u8], params: &EncodeParams) -> Result<EncodedImage, BackendError>;
}
