//! Parameter types for encode operations.
//!
//! These structs describe *what* to produce, not *how*. They are the interface
//! between the [`convert`](crate::convert) orchestrator (which decides target
//! size and format per item) and the [`backend`](super::backend) (which does
//! the pixel work). Keeping them plain data lets tests drive a mock backend
//! and assert on exactly what was requested.
//!
//! ## Types
//!
//! - [`Quality`] — Lossy encoding quality (1–100, default 80). Clamped on construction.
//! - [`EncodeQuality`] — Either a lossy [`Quality`] or the encoder's maximum-fidelity setting.
//! - [`OutputFormat`] — The four target formats and their MIME/extension mapping.
//! - [`EncodeParams`] — Full specification for one encode: target dimensions, format, quality.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub struct Quality(u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(80)
    }
}

impl From<u32> for Quality {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl From<Quality> for u32 {
    fn from(q: Quality) -> Self {
        q.0
    }
}

/// Quality actually handed to the encoder.
///
/// `Lossless` overrides any numeric quality: formats with a true lossless mode
/// use it, the rest encode at their highest quality setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeQuality {
    Lossy(Quality),
    Lossless,
}

impl EncodeQuality {
    pub fn from_settings(quality: Quality, lossless: bool) -> Self {
        if lossless {
            Self::Lossless
        } else {
            Self::Lossy(quality)
        }
    }

    /// Numeric 1-100 value for encoders without a lossless mode.
    pub fn numeric(self) -> u32 {
        match self {
            Self::Lossy(q) => q.value(),
            Self::Lossless => 100,
        }
    }
}

/// Output formats the converter can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Webp,
    Avif,
    Jpeg,
    Png,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 4] = [Self::Webp, Self::Avif, Self::Jpeg, Self::Png];

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Webp => "image/webp",
            Self::Avif => "image/avif",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Webp => "webp",
            Self::Avif => "avif",
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }

    pub fn from_mime_type(mime: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.mime_type() == mime)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        if let Some(format) = Self::from_mime_type(&lower) {
            return Ok(format);
        }
        match lower.as_str() {
            "webp" => Ok(Self::Webp),
            "avif" => Ok(Self::Avif),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

/// Parameters for a single encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeParams {
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    pub quality: EncodeQuality,
}
