//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Convert
//!
//! ```text
//! Converting 2 images
//!     beach
//!         4000x3000 → 800x600 WEBP
//!         3.2 MB → 96.5 KB (-97%)
//!     notes
//!         failed (decode): Unreadable image: ...
//! Converted 1, failed 1, skipped 0
//! ```
//!
//! ## Gallery / cloud listings
//!
//! ```text
//! 001 beach (WEBP, 800x600, 96.5 KB)
//!     Id: 3f2a…
//!     Saved: 2024-06-10 12:00
//! ```
//!
//! # Architecture
//!
//! Each view has a `format_*` function (returns `Vec<String>`) for testability
//! and a `print_*` wrapper that writes to stdout. Format functions are pure —
//! no I/O, no side effects.

use crate::cloud::CloudRecord;
use crate::convert::{BatchSummary, ConvertEvent, Delivery};
use crate::gallery::GalleryItem;
use chrono::{DateTime, Utc};

// ============================================================================
// Shared display helpers
// ============================================================================

const SIZE_UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];

/// Human-readable byte size: `0 Bytes`, `500 Bytes`, `1.5 KB`, `2 MB`.
///
/// Powers of 1024, at most two decimals, trailing zeros dropped.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let number = format!("{value:.2}");
    let number = number.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", number, SIZE_UNITS[unit])
}

/// Relative size change, rounded: `-42%`, `+5%`, `0%`.
pub fn format_size_change(before: u64, after: u64) -> String {
    if before == 0 {
        return "n/a".to_string();
    }
    let change = ((after as f64 - before as f64) / before as f64 * 100.0).round() as i64;
    if change > 0 {
        format!("+{change}%")
    } else {
        format!("{change}%")
    }
}

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

// ============================================================================
// Convert
// ============================================================================

pub fn format_summary(summary: &BatchSummary) -> String {
    format!(
        "Converted {}, failed {}, skipped {}",
        summary.converted, summary.failed, summary.skipped
    )
}

/// Format a single conversion progress event as display lines.
pub fn format_convert_event(event: &ConvertEvent) -> Vec<String> {
    match event {
        ConvertEvent::BatchStarted { count } => {
            let noun = if *count == 1 { "image" } else { "images" };
            vec![format!("Converting {count} {noun}")]
        }
        ConvertEvent::ItemStarted { .. } => Vec::new(),
        ConvertEvent::ItemConverted {
            name,
            original,
            original_size,
            width,
            height,
            format,
            size,
            ..
        } => vec![
            format!("    {name}"),
            format!(
                "        {}x{} \u{2192} {}x{} {}",
                original.width,
                original.height,
                width,
                height,
                format.to_string().to_uppercase()
            ),
            format!(
                "        {} \u{2192} {} ({})",
                format_bytes(*original_size),
                format_bytes(*size),
                format_size_change(*original_size, *size)
            ),
        ],
        ConvertEvent::ItemFailed { name, failure, .. } => vec![
            format!("    {name}"),
            format!("        failed ({}): {}", failure.kind, failure.message),
        ],
        ConvertEvent::ItemSkipped { id } => vec![format!("    skipped {id}")],
        ConvertEvent::BatchFinished(summary) => vec![format_summary(summary)],
    }
}

/// Lines for what was written or saved for one item.
pub fn format_delivery(delivery: &Delivery) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(Ok(path)) = &delivery.written {
        lines.push(format!("Wrote {}", path.display()));
    }
    if let Some(Ok(saved)) = &delivery.saved {
        lines.push(format!("Saved {} to gallery ({})", saved.name, saved.id));
    }
    lines
}

/// Lines for the destinations that failed for one item.
pub fn format_delivery_errors(delivery: &Delivery) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(Err(e)) = &delivery.written {
        lines.push(format!("Write failed for {}: {e}", delivery.name));
    }
    if let Some(Err(e)) = &delivery.saved {
        lines.push(format!("Save failed for {}: {e}", delivery.name));
    }
    lines
}

// ============================================================================
// Gallery
// ============================================================================

pub fn format_gallery_list(items: &[GalleryItem]) -> Vec<String> {
    if items.is_empty() {
        return vec!["Gallery is empty".to_string()];
    }
    let mut lines = Vec::new();
    for (i, item) in items.iter().enumerate() {
        lines.push(format!(
            "{} {} ({}, {}x{}, {})",
            format_index(i + 1),
            item.name,
            item.format.to_string().to_uppercase(),
            item.width,
            item.height,
            format_bytes(item.size)
        ));
        lines.push(format!("    Id: {}", item.id));
        lines.push(format!("    Saved: {}", format_timestamp(&item.created_at)));
    }
    lines
}

pub fn print_gallery_list(items: &[GalleryItem]) {
    for line in format_gallery_list(items) {
        println!("{}", line);
    }
}

// ============================================================================
// Cloud
// ============================================================================

fn cloud_header(index: usize, record: &CloudRecord) -> String {
    format!(
        "{} {} ({}, {})",
        format_index(index),
        record.original_name,
        record.format.to_uppercase(),
        format_bytes(record.size)
    )
}

pub fn format_cloud_list(records: &[CloudRecord]) -> Vec<String> {
    if records.is_empty() {
        return vec!["No cloud images".to_string()];
    }
    let mut lines = Vec::new();
    for (i, record) in records.iter().enumerate() {
        lines.push(cloud_header(i + 1, record));
        lines.push(format!("    Id: {}", record.id));
        lines.push(format!("    Url: {}", record.url));
        lines.push(format!("    Uploaded: {}", format_timestamp(&record.created_at)));
    }
    lines
}

pub fn print_cloud_list(records: &[CloudRecord]) {
    for line in format_cloud_list(records) {
        println!("{}", line);
    }
}

/// One line for a record seen on the live feed.
pub fn format_cloud_insert(record: &CloudRecord) -> String {
    format!(
        "+ {} ({}, {}) {}",
        record.original_name,
        record.format.to_uppercase(),
        format_bytes(record.size),
        record.url
    )
}
