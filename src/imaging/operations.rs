//! High-level image operations.
//!
//! These functions combine calculations with backend execution: they take a
//! conversion request, compute encode parameters, and call the backend.

use super::backend::{BackendError, Dimensions, EncodedImage, ImageBackend};
use super::calculations::{PlanError, ResizePolicy, plan_resize};
use super::params::{EncodeParams, EncodeQuality, OutputFormat, Quality};
use thiserror::Error;

/// Everything that can go wrong converting one image.
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("encoder produced {produced} instead of {requested}")]
    FormatMismatch {
        requested: OutputFormat,
        produced: OutputFormat,
    },
}

/// Settings for a single conversion, snapshotted when it starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConversionRequest {
    pub format: OutputFormat,
    pub quality: Quality,
    pub lossless: bool,
    pub resize: ResizePolicy,
}

impl Default for ConversionRequest {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            quality: Quality::default(),
            lossless: false,
            resize: ResizePolicy::default(),
        }
    }
}

/// Result of a successful conversion.
#[derive(Debug, Clone)]
pub struct Conversion {
    pub native: Dimensions,
    pub encoded: EncodedImage,
}

/// Plan an encode without executing it.
///
/// Useful for testing parameter generation.
pub fn plan_encode(
    native: (u32, u32),
    request: &ConversionRequest,
) -> Result<EncodeParams, PlanError> {
    let (width, height) = plan_resize(native, &request.resize)?;
    Ok(EncodeParams {
        width,
        height,
        format: request.format,
        quality: EncodeQuality::from_settings(request.quality, request.lossless),
    })
}

/// Convert one source image.
///
/// An invalid resize policy fails before the backend is touched. The
/// backend must produce the requested format; a silent fallback (e.g. to
/// PNG) is reported as [`ConversionError::FormatMismatch`].
pub fn convert_image(
    backend: &impl ImageBackend,
    source: &[u8],
    request: &ConversionRequest,
) -> Result<Conversion, ConversionError> {
    request.resize.validate()?;
    let native = backend.identify(source)?;
    let params = plan_encode((native.width, native.height), request)?;
    let encoded = backend.encode(source, &params)?;
    if encoded.format != request.format {
        return Err(ConversionError::FormatMismatch {
            requested: request.format,
            produced: encoded.format,
        });
    }
    Ok(Conversion { native, encoded })
}
