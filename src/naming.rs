//! Centralized naming for items, downloads, and uploaded objects.
//!
//! Every image carries a user-editable display name. The same name is reused
//! wherever the image leaves the process:
//! - `holiday.final.jpg` → "holiday.final" (display name)
//! - "holiday.final" + WebP → `holiday.final.webp` (download / export)
//! - "holiday.final" + WebP at t → `1718000000000_holiday.final.webp` (cloud object)

use crate::imaging::OutputFormat;

/// Display name for a selected file: everything before the last dot.
///
/// - `"photo.jpg"` → `"photo"`
/// - `"photo.final.jpg"` → `"photo.final"`
/// - `"README"` → `"README"` (no extension)
/// - `".hidden"` → `".hidden"` (nothing before the dot)
pub fn display_name(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => file_name.to_string(),
    }
}

/// Replace characters that would escape the target directory or break a
/// storage key.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "image".to_string()
    } else {
        cleaned
    }
}

/// File name for a converted image written to disk: `{name}.{ext}`.
pub fn file_name(name: &str, format: OutputFormat) -> String {
    format!("{}.{}", sanitize(name), format.extension())
}

/// Object key for an upload: `{unix_millis}_{name}.{ext}`.
///
/// The timestamp makes every attempt a fresh key, so a retry never
/// overwrites an earlier object.
pub fn object_key(unix_millis: i64, name: &str, format: OutputFormat) -> String {
    format!("{}_{}", unix_millis, file_name(name, format))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_last_extension_only() {
        assert_eq!(display_name("photo.jpg"), "photo");
        assert_eq!(display_name("photo.final.jpg"), "photo.final");
    }

    #[test]
    fn no_extension_keeps_full_name() {
        assert_eq!(display_name("README"), "README");
    }

    #[test]
    fn leading_dot_keeps_full_name() {
        assert_eq!(display_name(".hidden"), ".hidden");
    }

    #[test]
    fn trailing_dot() {
        assert_eq!(display_name("odd."), "odd");
    }

    #[test]
    fn file_name_uses_format_extension() {
        assert_eq!(file_name("dawn", OutputFormat::Webp), "dawn.webp");
        assert_eq!(file_name("dawn", OutputFormat::Jpeg), "dawn.jpg");
    }

    #[test]
    fn file_name_cannot_escape_directory() {
        assert_eq!(file_name("../etc/passwd", OutputFormat::Png), ".._etc_passwd.png");
        assert_eq!(file_name("..", OutputFormat::Png), "image.png");
        assert_eq!(file_name("   ", OutputFormat::Png), "image.png");
    }

    #[test]
    fn object_key_prefixes_timestamp() {
        assert_eq!(
            object_key(1718000000000, "holiday", OutputFormat::Avif),
            "1718000000000_holiday.avif"
        );
    }
}
