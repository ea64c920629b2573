//! Application configuration.
//!
//! Handles loading, validating, and merging `cosmo.toml`. Stock defaults are
//! overridden by the user's file, which is in turn overridden by CLI flags
//! for a single run.
//!
//! ## Config File Location
//!
//! `--config FILE` if given, otherwise `<user config dir>/cosmo-convert/cosmo.toml`.
//! A missing default file simply means stock defaults.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [convert]
//! format = "webp"           # webp | avif | jpeg | png
//! quality = 80              # 1-100, ignored when lossless
//! lossless = false
//!
//! [resize]
//! mode = "keep"             # keep | percentage | explicit
//! percentage = 100.0        # used by mode = "percentage"
//! # width = 800             # used by mode = "explicit"
//! # height = 800
//! maintain_aspect = true    # explicit: fit inside the box instead of stretching
//!
//! [gallery]
//! # dir = "/path/to/gallery"
//!
//! [cloud]
//! # url = "https://project.supabase.co"
//! # anon_key = "..."
//! bucket = "images"
//! table = "images"
//! ```
//!
//! Cloud credentials left unset fall back to `COSMO_CLOUD_URL` and
//! `COSMO_CLOUD_ANON_KEY`.
//!
//! ## Partial Configuration
//!
//! Config files are sparse — override just the values you want:
//!
//! ```toml
//! [convert]
//! format = "avif"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::convert::ConvertSettings;
use crate::imaging::{OutputFormat, Quality, ResizeMode, ResizePolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable consulted when `cloud.url` is unset.
pub const CLOUD_URL_ENV: &str = "COSMO_CLOUD_URL";
/// Environment variable consulted when `cloud.anon_key` is unset.
pub const CLOUD_KEY_ENV: &str = "COSMO_CLOUD_ANON_KEY";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Configuration loaded from `cosmo.toml`.
///
/// All fields have sensible defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Target format and quality.
    pub convert: ConvertConfig,
    /// How output dimensions are derived.
    pub resize: ResizePolicy,
    /// Local gallery location.
    pub gallery: GalleryConfig,
    /// Cloud backend connection.
    pub cloud: CloudConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConvertConfig {
    pub format: OutputFormat,
    /// Encoder quality (1-100).
    pub quality: u32,
    /// Maximum fidelity; overrides `quality`.
    pub lossless: bool,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            quality: Quality::default().value(),
            lossless: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GalleryConfig {
    /// Gallery directory; defaults to the user data dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

/// Connection settings for the cloud backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CloudConfig {
    /// Project base URL, e.g. `https://project.supabase.co`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Public (anon) API key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anon_key: Option<String>,
    /// Storage bucket for uploaded images.
    pub bucket: String,
    /// Metadata table, also the realtime channel topic.
    pub table: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            url: None,
            anon_key: None,
            bucket: "images".to_string(),
            table: "images".to_string(),
        }
    }
}

impl CloudConfig {
    /// Both the URL and the key are present and non-empty.
    pub fn is_configured(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.url) && present(&self.anon_key)
    }

    /// Fill unset credentials from `lookup` (the environment in production).
    /// Values from the config file win.
    pub fn with_fallback(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if self.url.is_none() {
            self.url = lookup(CLOUD_URL_ENV);
        }
        if self.anon_key.is_none() {
            self.anon_key = lookup(CLOUD_KEY_ENV);
        }
        self
    }
}

impl AppConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.convert.quality) {
            return Err(ConfigError::Validation(
                "convert.quality must be 1-100".into(),
            ));
        }
        self.resize
            .validate()
            .map_err(|e| ConfigError::Validation(format!("resize: {e}")))?;
        if let Some(url) = &self.cloud.url
            && !url.trim().is_empty()
        {
            let parsed = url::Url::parse(url)
                .map_err(|e| ConfigError::Validation(format!("cloud.url: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::Validation(
                    "cloud.url must be an http(s) URL".into(),
                ));
            }
        }
        if self.cloud.bucket.is_empty() || self.cloud.table.is_empty() {
            return Err(ConfigError::Validation(
                "cloud.bucket and cloud.table must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Settings for the converter.
    pub fn convert_settings(&self) -> ConvertSettings {
        ConvertSettings {
            format: self.convert.format,
            quality: Quality::new(self.convert.quality),
            lossless: self.convert.lossless,
            resize: self.resize,
        }
    }

    /// Gallery directory: the configured one, else the platform default.
    pub fn gallery_dir(&self) -> Result<PathBuf, ConfigError> {
        self.gallery
            .dir
            .clone()
            .or_else(crate::gallery::default_dir)
            .ok_or_else(|| {
                ConfigError::Validation(
                    "no user data directory; set gallery.dir in the config".into(),
                )
            })
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Default config file: `<user config dir>/cosmo-convert/cosmo.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("cosmo-convert"))
        .unwrap_or_default()
        .join("cosmo.toml")
}

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(AppConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize.
///
/// Not validated: the file may leave gaps that command-line flags fill.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<AppConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    Ok(merged.try_into()?)
}

/// Load and validate config from `path`, falling back to stock defaults
/// when the file is absent. Cloud credentials are completed from the
/// environment.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    load_config_with(path, &ConfigOverrides::default())
}

/// Like [`load_config`], with per-run overrides applied before validation.
pub fn load_config_with(
    path: &Path,
    overrides: &ConfigOverrides,
) -> Result<AppConfig, ConfigError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(path)?;
    let mut config = resolve_config(base, overlay)?;
    overrides.apply(&mut config);
    config.cloud = config.cloud.with_fallback(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

// =============================================================================
// Per-run overrides
// =============================================================================

/// Values given for a single run (command-line flags). `None`/`false`
/// leaves the file's value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub format: Option<OutputFormat>,
    pub quality: Option<u32>,
    pub lossless: bool,
    pub mode: Option<ResizeMode>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub percentage: Option<f64>,
    pub stretch: bool,
}

impl ConfigOverrides {
    /// Apply on top of `config`.
    ///
    /// Without an explicit mode, giving a width or height selects explicit
    /// mode and giving only a percentage selects percentage mode.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(format) = self.format {
            config.convert.format = format;
        }
        if let Some(quality) = self.quality {
            config.convert.quality = quality;
        }
        if self.lossless {
            config.convert.lossless = true;
        }
        let resize = &mut config.resize;
        if let Some(mode) = self.mode {
            resize.mode = mode;
        } else if self.width.is_some() || self.height.is_some() {
            resize.mode = ResizeMode::Explicit;
        } else if self.percentage.is_some() {
            resize.mode = ResizeMode::Percentage;
        }
        if self.width.is_some() {
            resize.width = self.width;
        }
        if self.height.is_some() {
            resize.height = self.height;
        }
        if let Some(percentage) = self.percentage {
            resize.percentage = percentage;
        }
        if self.stretch {
            resize.maintain_aspect = false;
        }
    }
}

/// Returns a fully-commented stock `cosmo.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# cosmo-convert Configuration
# ===========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys will cause an error.
#
# Command-line flags override these values for a single run.

# ---------------------------------------------------------------------------
# Output encoding
# ---------------------------------------------------------------------------
[convert]
# Target format: "webp", "avif", "jpeg" or "png".
format = "webp"

# Encoding quality (1 = smallest, 100 = best). Ignored when lossless is on.
# The WebP encoder is lossless-only and ignores this value.
quality = 80

# Maximum-fidelity encoding; overrides quality.
lossless = false

# ---------------------------------------------------------------------------
# Resizing
# ---------------------------------------------------------------------------
[resize]
# "keep"       - keep the original dimensions
# "percentage" - scale both sides by `percentage`
# "explicit"   - target `width` and/or `height`
mode = "keep"

# Scale factor in percent for mode = "percentage". Must be > 0.
percentage = 100.0

# Target box for mode = "explicit". Give one or both.
# width = 800
# height = 800

# explicit mode only:
#   true  - keep the aspect ratio: fit inside the box, or derive the missing side
#   false - stretch to exactly width x height; a missing side keeps its original size
maintain_aspect = true

# ---------------------------------------------------------------------------
# Local gallery
# ---------------------------------------------------------------------------
[gallery]
# Directory for saved images. Default: <user data dir>/cosmo-convert/gallery
# dir = "/path/to/gallery"

# ---------------------------------------------------------------------------
# Cloud upload (Supabase-compatible backend)
# ---------------------------------------------------------------------------
[cloud]
# Project URL and public anon key. When unset, the COSMO_CLOUD_URL and
# COSMO_CLOUD_ANON_KEY environment variables are used.
# url = "https://project.supabase.co"
# anon_key = "..."

# Storage bucket that receives the image files.
bucket = "images"

# Table holding one metadata row per upload (also the realtime channel).
table = "images"
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(tmp: &TempDir, content: &str) -> PathBuf {
        let path = tmp.path().join("cosmo.toml");
        fs::write(&path, content).unwrap();
        path
    }

    // =========================================================================
    // Defaults
    // =========================================================================

    #[test]
    fn default_config_values() {
        let config = AppConfig::default();
        assert_eq!(config.convert.format, OutputFormat::Webp);
        assert_eq!(config.convert.quality, 80);
        assert!(!config.convert.lossless);
        assert_eq!(config.resize.mode, ResizeMode::Keep);
        assert_eq!(config.cloud.bucket, "images");
        assert_eq!(config.cloud.table, "images");
        assert!(!config.cloud.is_configured());
    }

    #[test]
    fn validate_default_config_passes() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn convert_settings_from_config() {
        let mut config = AppConfig::default();
        config.convert.format = OutputFormat::Avif;
        config.convert.quality = 55;
        config.resize = ResizePolicy::percentage(50.0);

        let settings = config.convert_settings();
        assert_eq!(settings.format, OutputFormat::Avif);
        assert_eq!(settings.quality, Quality::new(55));
        assert_eq!(settings.resize, ResizePolicy::percentage(50.0));
    }

    // =========================================================================
    // Loading
    // =========================================================================

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.convert, ConvertConfig::default());
        assert_eq!(config.resize, ResizePolicy::default());
    }

    #[test]
    fn parse_partial_config() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            r#"
[convert]
format = "avif"

[resize]
mode = "explicit"
width = 800
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.convert.format, OutputFormat::Avif);
        assert_eq!(config.convert.quality, 80);
        assert_eq!(config.resize.mode, ResizeMode::Explicit);
        assert_eq!(config.resize.width, Some(800));
        assert_eq!(config.resize.height, None);
        assert!(config.resize.maintain_aspect);
    }

    #[test]
    fn integer_percentage_is_accepted() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[resize]\nmode = \"percentage\"\npercentage = 50\n");
        let config = load_config(&path).unwrap();
        assert_eq!(config.resize.percentage, 50.0);
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "this is not toml [");
        assert!(matches!(load_config(&path), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn unknown_key_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[convert]\nqualty = 90\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn unknown_section_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[colors]\nbackground = \"#fff\"\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn unknown_format_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[convert]\nformat = \"gif\"\n");
        assert!(load_config(&path).is_err());
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn validate_quality_bounds() {
        let mut config = AppConfig::default();
        config.convert.quality = 100;
        assert!(config.validate().is_ok());
        config.convert.quality = 1;
        assert!(config.validate().is_ok());

        config.convert.quality = 0;
        assert!(config.validate().unwrap_err().to_string().contains("quality"));
        config.convert.quality = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_explicit_without_dimensions() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[resize]\nmode = \"explicit\"\n");
        assert!(matches!(load_config(&path), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn width_flag_completes_explicit_mode_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[resize]\nmode = \"explicit\"\n");
        let overrides = ConfigOverrides {
            width: Some(640),
            ..ConfigOverrides::default()
        };
        let config = load_config_with(&path, &overrides).unwrap();
        assert_eq!(config.resize.mode, ResizeMode::Explicit);
        assert_eq!(config.resize.width, Some(640));
        assert_eq!(config.resize.height, None);
    }

    #[test]
    fn override_can_still_fail_validation() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[convert]\nquality = 50\n");
        let overrides = ConfigOverrides {
            quality: Some(0),
            ..ConfigOverrides::default()
        };
        assert!(matches!(
            load_config_with(&path, &overrides),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn resolve_config_defers_validation() {
        let overlay: toml::Value = toml::from_str("[resize]\nmode = \"explicit\"").unwrap();
        let config = resolve_config(stock_defaults_value(), Some(overlay)).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn overrides_pick_mode_from_given_values() {
        let mut config = AppConfig::default();
        ConfigOverrides {
            percentage: Some(50.0),
            ..ConfigOverrides::default()
        }
        .apply(&mut config);
        assert_eq!(config.resize.mode, ResizeMode::Percentage);

        let mut config = AppConfig::default();
        ConfigOverrides {
            mode: Some(ResizeMode::Keep),
            width: Some(10),
            stretch: true,
            ..ConfigOverrides::default()
        }
        .apply(&mut config);
        assert_eq!(config.resize.mode, ResizeMode::Keep);
        assert_eq!(config.resize.width, Some(10));
        assert!(!config.resize.maintain_aspect);
    }

    #[test]
    fn validate_rejects_bad_percentage() {
        let mut config = AppConfig::default();
        config.resize = ResizePolicy::percentage(-5.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_cloud_url() {
        let mut config = AppConfig::default();
        config.cloud.url = Some("not a url".into());
        assert!(config.validate().is_err());
        config.cloud.url = Some("ftp://example.com".into());
        assert!(config.validate().is_err());
        config.cloud.url = Some("https://project.supabase.co".into());
        assert!(config.validate().is_ok());
    }

    // =========================================================================
    // Cloud credentials
    // =========================================================================

    #[test]
    fn cloud_requires_url_and_key() {
        let mut cloud = CloudConfig::default();
        cloud.url = Some("https://x.supabase.co".into());
        assert!(!cloud.is_configured());
        cloud.anon_key = Some("  ".into());
        assert!(!cloud.is_configured());
        cloud.anon_key = Some("key".into());
        assert!(cloud.is_configured());
    }

    #[test]
    fn env_fills_only_missing_credentials() {
        let cloud = CloudConfig {
            url: Some("https://from-file.supabase.co".into()),
            ..CloudConfig::default()
        };
        let cloud = cloud.with_fallback(|key| match key {
            CLOUD_URL_ENV => Some("https://from-env.supabase.co".into()),
            CLOUD_KEY_ENV => Some("env-key".into()),
            _ => None,
        });
        assert_eq!(cloud.url.as_deref(), Some("https://from-file.supabase.co"));
        assert_eq!(cloud.anon_key.as_deref(), Some("env-key"));
    }

    // =========================================================================
    // merge_toml tests
    // =========================================================================

    #[test]
    fn merge_toml_scalar_override() {
        let base: toml::Value = toml::from_str("quality = 80").unwrap();
        let overlay: toml::Value = toml::from_str("quality = 60").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged.get("quality").unwrap().as_integer(), Some(60));
    }

    #[test]
    fn merge_toml_preserves_base_keys() {
        let base: toml::Value =
            toml::from_str("[convert]\nformat = \"webp\"\nquality = 80").unwrap();
        let overlay: toml::Value = toml::from_str("[convert]\nquality = 60").unwrap();
        let merged = merge_toml(base, overlay);
        let convert = merged.get("convert").unwrap();
        assert_eq!(convert.get("format").unwrap().as_str(), Some("webp"));
        assert_eq!(convert.get("quality").unwrap().as_integer(), Some(60));
    }

    // =========================================================================
    // Stock config
    // =========================================================================

    #[test]
    fn stock_config_parses_to_defaults() {
        let value: toml::Value = toml::from_str(stock_config_toml()).unwrap();
        let config = resolve_config(stock_defaults_value(), Some(value)).unwrap();
        assert_eq!(config, AppConfig::default());
    }
}
