//! Pure calculation functions for output dimensions.
//!
//! All functions here are pure and testable without any I/O or images.
//! The [`plan_resize`] entry point turns a native image size and a
//! [`ResizePolicy`] into the pixel size handed to the encoder.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest output edge the planner will hand to an encoder.
pub const MAX_DIMENSION: u32 = 65_535;

/// A resize policy that cannot produce a target size.
///
/// Raised before any encode is attempted; the caller must not convert.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("explicit resize needs a width, a height, or both")]
    MissingDimensions,
    #[error("resize percentage must be greater than 0 (got {0})")]
    InvalidPercentage(f64),
    #[error("source image has no pixels ({width}x{height})")]
    EmptySource { width: u32, height: u32 },
    #[error("output size {width}x{height} exceeds the {MAX_DIMENSION} pixel limit")]
    TooLarge { width: u64, height: u64 },
}

/// How the output size is derived from the source size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMode {
    /// Output keeps the native dimensions.
    #[default]
    Keep,
    /// Both axes scaled by `percentage`.
    Percentage,
    /// Target `width` and/or `height` given in pixels.
    Explicit,
}

/// User-chosen rule set for output dimensions.
///
/// `width`/`height` of `None` or `Some(0)` both mean "not given".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResizePolicy {
    pub mode: ResizeMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub percentage: f64,
    pub maintain_aspect: bool,
}

impl Default for ResizePolicy {
    fn default() -> Self {
        Self {
            mode: ResizeMode::Keep,
            width: None,
            height: None,
            percentage: 100.0,
            maintain_aspect: true,
        }
    }
}

impl ResizePolicy {
    pub fn keep() -> Self {
        Self::default()
    }

    pub fn percentage(percentage: f64) -> Self {
        Self {
            mode: ResizeMode::Percentage,
            percentage,
            ..Self::default()
        }
    }

    pub fn explicit(width: Option<u32>, height: Option<u32>, maintain_aspect: bool) -> Self {
        Self {
            mode: ResizeMode::Explicit,
            width,
            height,
            maintain_aspect,
            ..Self::default()
        }
    }

    /// Reject policies that can never plan, independent of any source image.
    pub fn validate(&self) -> Result<(), PlanError> {
        match self.mode {
            ResizeMode::Keep => Ok(()),
            ResizeMode::Percentage => check_percentage(self.percentage),
            ResizeMode::Explicit => {
                let (width, height) = (given(self.width), given(self.height));
                if width.is_none() && height.is_none() {
                    return Err(PlanError::MissingDimensions);
                }
                let edge = |v: Option<u32>| u64::from(v.unwrap_or(0));
                if width.max(height).is_some_and(|n| n > MAX_DIMENSION) {
                    return Err(PlanError::TooLarge {
                        width: edge(width),
                        height: edge(height),
                    });
                }
                Ok(())
            }
        }
    }
}

fn given(v: Option<u32>) -> Option<u32> {
    v.filter(|&n| n > 0)
}

fn check_percentage(p: f64) -> Result<(), PlanError> {
    if p.is_finite() && p > 0.0 {
        Ok(())
    } else {
        Err(PlanError::InvalidPercentage(p))
    }
}

/// `edge * num / den`, rounded and clamped to at least one pixel.
///
/// Wider than `u32` so an oversized result is reported rather than clipped.
fn scaled(edge: u32, num: f64, den: f64) -> u64 {
    ((edge as f64 * num / den).round() as u64).max(1)
}

/// Accept a computed size only when both edges are within [`MAX_DIMENSION`].
fn within_limit((width, height): (u64, u64)) -> Result<(u32, u32), PlanError> {
    let limit = u64::from(MAX_DIMENSION);
    if width > limit || height > limit {
        return Err(PlanError::TooLarge { width, height });
    }
    Ok((width as u32, height as u32))
}

/// Calculate the output size for a source image under a resize policy.
///
/// # Arguments
/// * `source` - Native image dimensions (width, height)
/// * `policy` - Resize rules in effect for this conversion
///
/// # Returns
/// * `(width, height)` - Target dimensions, each at least 1. Percentage and
///   explicit plans are at most [`MAX_DIMENSION`] per edge; `Keep` returns the
///   source size unchanged.
///
/// # Examples
/// ```
/// # use cosmo_convert::imaging::{plan_resize, ResizePolicy};
/// // Contain 4000x3000 inside an 800x800 box → 800x600
/// let policy = ResizePolicy::explicit(Some(800), Some(800), true);
/// assert_eq!(plan_resize((4000, 3000), &policy), Ok((800, 600)));
///
/// // 50% of 801x601 rounds half away from zero → 401x301
/// assert_eq!(plan_resize((801, 601), &ResizePolicy::percentage(50.0)), Ok((401, 301)));
/// ```
pub fn plan_resize(source: (u32, u32), policy: &ResizePolicy) -> Result<(u32, u32), PlanError> {
    let (src_w, src_h) = source;
    if src_w == 0 || src_h == 0 {
        return Err(PlanError::EmptySource {
            width: src_w,
            height: src_h,
        });
    }

    match policy.mode {
        ResizeMode::Keep => Ok((src_w, src_h)),
        ResizeMode::Percentage => {
            let p = policy.percentage;
            check_percentage(p)?;
            within_limit((scaled(src_w, p, 100.0), scaled(src_h, p, 100.0)))
        }
        ResizeMode::Explicit => {
            plan_explicit(source, given(policy.width), given(policy.height), policy.maintain_aspect)
        }
    }
}

fn plan_explicit(
    (src_w, src_h): (u32, u32),
    width: Option<u32>,
    height: Option<u32>,
    maintain_aspect: bool,
) -> Result<(u32, u32), PlanError> {
    let wide = |n: u32| u64::from(n);
    let planned = match (width, height, maintain_aspect) {
        (None, None, _) => return Err(PlanError::MissingDimensions),
        // Contain: uniform scale so the result fits inside the box.
        (Some(w), Some(h), true) => {
            let (w, h) = calculate_fit_dimensions((src_w, src_h), (w, h));
            (wide(w), wide(h))
        }
        (Some(w), Some(h), false) => (wide(w), wide(h)),
        (Some(w), None, true) => (wide(w), scaled(src_h, w as f64, src_w as f64)),
        (None, Some(h), true) => (scaled(src_w, h as f64, src_h as f64), wide(h)),
        (Some(w), None, false) => (wide(w), wide(src_h)),
        (None, Some(h), false) => (wide(src_w), wide(h)),
    };
    within_limit(planned)
}

/// Calculate dimensions that fit inside a target box (resize without crop).
///
/// The scale factor is the smaller of the two axis ratios, so neither output
/// edge exceeds the box and the limiting edge matches it exactly.
///
/// # Arguments
/// * `source` - Original image dimensions (width, height)
/// * `target` - Bounding box dimensions (width, height)
pub fn calculate_fit_dimensions(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;

    // Compare tgt_w/src_w against tgt_h/src_h without dividing.
    // The scaled edge never exceeds its box edge, so it fits in u32.
    let fit = |edge: u32, num: u32, den: u32, bound: u32| {
        u32::try_from(scaled(edge, num as f64, den as f64)).map_or(bound, |n| n.min(bound))
    };
    if tgt_w as u64 * src_h as u64 <= tgt_h as u64 * src_w as u64 {
        (tgt_w, fit(src_h, tgt_w, src_w, tgt_h))
    } else {
        (fit(src_w, tgt_h, src_h, tgt_w), tgt_h)
    }
}
