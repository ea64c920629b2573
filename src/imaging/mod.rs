//! Image processing — pure Rust, zero system dependencies.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::ImageReader::into_dimensions`, AVIF container metadata |
//! | **Plan** | [`plan_resize`] (pure) |
//! | **Resize → encode** | Lanczos3 + WebP / AVIF (rav1e) / JPEG / PNG encoders |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing an encode
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: High-level functions combining calculations + backend

mod avif_decode;
pub mod backend;
mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, EncodedImage, ImageBackend};
pub use calculations::{
    MAX_DIMENSION, PlanError, ResizeMode, ResizePolicy, calculate_fit_dimensions, plan_resize,
};
pub use operations::{
    Conversion, ConversionError, ConversionRequest, convert_image, plan_encode,
};
pub use params::{EncodeParams, EncodeQuality, OutputFormat, Quality};
pub use rust_backend::{RustBackend, is_supported_input, supported_input_extensions};
