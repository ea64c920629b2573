//! Pure Rust codec backend — everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, BMP, TIFF, WebP) | `image` crate (pure Rust decoders) |
//! | Decode (AVIF) | [`avif_decode`](super::avif_decode): `avif-parse` + `rav1d` |
//! | Resize | `image::DynamicImage::resize_exact` with `Lanczos3` filter |
//! | Encode → WebP | `image::codecs::webp::WebPEncoder` (lossless only) |
//! | Encode → AVIF | `image::codecs::avif::AvifEncoder` (rav1e, speed 6) |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` |
//! | Encode → PNG | `image::codecs::png::PngEncoder` |
//!
//! The `image` crate only ships a lossless WebP encoder, so WebP output
//! ignores the numeric quality. AVIF has no lossless mode here; `Lossless`
//! maps to quality 100.

use super::avif_decode;
use super::backend::{BackendError, Dimensions, EncodedImage, ImageBackend};
use super::params::{EncodeParams, EncodeQuality, OutputFormat};
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageError, ImageFormat, ImageReader};
use std::io::Cursor;
use std::sync::LazyLock;

/// Extensions whose decoders are compiled in.
///
/// AVIF is decoded by our own rav1d path; the `image` crate's `"avif"`
/// feature only enables the encoder.
const INPUT_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("gif", ImageFormat::Gif),
    ("bmp", ImageFormat::Bmp),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
    ("webp", ImageFormat::WebP),
];

static SUPPORTED_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    let mut exts: Vec<&'static str> = INPUT_CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled())
        .map(|(ext, _)| *ext)
        .collect();
    exts.push("avif");
    exts
});

/// Returns the set of image file extensions that have working decoders compiled in.
pub fn supported_input_extensions() -> &'static [&'static str] {
    &SUPPORTED_EXTENSIONS
}

/// Whether a file name has an extension we can decode (case-insensitive).
pub fn is_supported_input(name: &str) -> bool {
    std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            supported_input_extensions()
                .iter()
                .any(|s| s.eq_ignore_ascii_case(ext))
        })
}

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend {
    /// rav1e speed preset for AVIF (1 = slowest/best, 10 = fastest).
    avif_speed: u8,
}

impl RustBackend {
    pub fn new() -> Self {
        Self { avif_speed: 6 }
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn reader(source: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, BackendError> {
    ImageReader::new(Cursor::new(source))
        .with_guessed_format()
        .map_err(BackendError::Io)
}

fn decode_error(e: ImageError) -> BackendError {
    BackendError::Decode(e.to_string())
}

/// Decode source bytes into pixels.
fn load_image(source: &[u8]) -> Result<DynamicImage, BackendError> {
    if avif_decode::is_avif(source) {
        return avif_decode::decode(source);
    }
    reader(source)?.decode().map_err(decode_error)
}

/// Drop to 8-bit RGB(A); every encoder below accepts these layouts.
fn to_8bit(img: DynamicImage, keep_alpha: bool) -> DynamicImage {
    if keep_alpha && img.color().has_alpha() {
        DynamicImage::ImageRgba8(img.into_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.into_rgb8())
    }
}

fn encode_error(format: OutputFormat, e: ImageError) -> BackendError {
    match e {
        ImageError::Unsupported(u) => {
            BackendError::UnsupportedFormat(format!("{}: {}", format.mime_type(), u))
        }
        other => BackendError::EncodeFailed(format!("{} encode failed: {}", format, other)),
    }
}

impl RustBackend {
    fn write(
        &self,
        img: DynamicImage,
        format: OutputFormat,
        quality: EncodeQuality,
    ) -> Result<Vec<u8>, BackendError> {
        let mut buf = Vec::new();
        let result = match format {
            OutputFormat::Webp => {
                let rgba = img.into_rgba8();
                WebPEncoder::new_lossless(&mut buf).encode(
                    rgba.as_raw(),
                    rgba.width(),
                    rgba.height(),
                    ExtendedColorType::Rgba8,
                )
            }
            OutputFormat::Avif => to_8bit(img, true).write_with_encoder(
                AvifEncoder::new_with_speed_quality(
                    &mut buf,
                    self.avif_speed,
                    quality.numeric() as u8,
                ),
            ),
            OutputFormat::Jpeg => to_8bit(img, false).write_with_encoder(
                JpegEncoder::new_with_quality(&mut buf, quality.numeric() as u8),
            ),
            OutputFormat::Png => to_8bit(img, true).write_with_encoder(PngEncoder::new(&mut buf)),
        };
        result.map_err(|e| encode_error(format, e))?;
        Ok(buf)
    }
}

impl ImageBackend for RustBackend {
    fn identify(&self, source: &[u8]) -> Result<Dimensions, BackendError> {
        if avif_decode::is_avif(source) {
            return avif_decode::identify(source);
        }
        let (width, height) = reader(source)?.into_dimensions().map_err(decode_error)?;
        Ok(Dimensions { width, height })
    }

    fn encode(&self, source: &[u8], params: &EncodeParams) -> Result<EncodedImage, BackendError> {
        let img = load_image(source)?;
        let resized = if img.width() == params.width && img.height() == params.height {
            img
        } else {
            img.resize_exact(params.width, params.height, FilterType::Lanczos3)
        };
        let bytes = self.write(resized, params.format, params.quality)?;
        Ok(EncodedImage {
            bytes,
            width: params.width,
            height: params.height,
            format: params.format,
        })
    }
}
