//! End-to-end conversion through the public API with the real backend.
//!
//! Sources are generated in memory as PNG, converted by `RustBackend`, then
//! written out, saved to a filesystem gallery, and exported again.

use cosmo_convert::convert::{
    ConvertEvent, ConvertSettings, Converter, FailureKind, ItemStatus, SaveState,
};
use cosmo_convert::gallery::{self, FsGalleryStore, GalleryStore};
use cosmo_convert::imaging::{OutputFormat, Quality, ResizeMode, ResizePolicy, RustBackend};
use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage};
use std::io::Cursor;
use std::sync::mpsc;
use tempfile::TempDir;

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 64])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

fn settings(format: OutputFormat, resize: ResizePolicy) -> ConvertSettings {
    ConvertSettings {
        format,
        quality: Quality::new(70),
        lossless: false,
        resize,
    }
}

fn percentage(p: f64) -> ResizePolicy {
    ResizePolicy {
        mode: ResizeMode::Percentage,
        percentage: p,
        ..ResizePolicy::default()
    }
}

fn failure_kind(status: &ItemStatus) -> Option<FailureKind> {
    match status {
        ItemStatus::Error(failure) => Some(failure.kind),
        _ => None,
    }
}

#[test]
fn batch_converts_saves_and_exports() {
    let tmp = TempDir::new().unwrap();
    let store = FsGalleryStore::open(tmp.path().join("gallery")).unwrap();
    let (tx, rx) = mpsc::channel();

    let mut converter =
        Converter::new(RustBackend::new(), settings(OutputFormat::Webp, percentage(50.0)))
            .with_events(tx);
    let good = converter.add_bytes("holiday.png", png_bytes(120, 80));
    let bad = converter.add_bytes("notes.png", b"not an image".to_vec());

    let summary = converter.convert_pending();
    assert_eq!((summary.converted, summary.failed, summary.skipped), (1, 1, 0));

    let converted = converter.get(good).unwrap().converted().unwrap();
    assert_eq!((converted.width, converted.height), (60, 40));
    assert_eq!(converted.format, OutputFormat::Webp);
    assert_eq!(
        image::guess_format(converted.bytes()).unwrap(),
        ImageFormat::WebP
    );
    assert_eq!(
        failure_kind(&converter.get(bad).unwrap().status),
        Some(FailureKind::Decode)
    );

    let events: Vec<ConvertEvent> = rx.try_iter().collect();
    assert!(matches!(events.first(), Some(ConvertEvent::BatchStarted { count: 2 })));
    assert!(matches!(events.last(), Some(ConvertEvent::BatchFinished(_))));

    // Download next to the gallery.
    let written = converter.download(good, &tmp.path().join("out")).unwrap();
    assert_eq!(written.file_name().unwrap(), "holiday.webp");

    // Save, then export from the gallery and decode the result.
    let saved = converter.save_to_gallery(good, &store).unwrap();
    assert_eq!(
        converter.get(good).unwrap().save,
        SaveState::Saved {
            gallery_id: saved.id.clone()
        }
    );
    let listed = store.list().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "holiday");
    assert_eq!((listed[0].width, listed[0].height), (60, 40));

    let exported = gallery::export(&store, &saved.id, &tmp.path().join("export")).unwrap();
    let decoded = image::load_from_memory(&std::fs::read(exported).unwrap()).unwrap();
    assert_eq!(decoded.dimensions(), (60, 40));
}

#[test]
fn explicit_box_keeps_aspect_ratio() {
    let resize = ResizePolicy {
        mode: ResizeMode::Explicit,
        width: Some(200),
        height: Some(200),
        ..ResizePolicy::default()
    };
    let mut converter = Converter::new(RustBackend::new(), settings(OutputFormat::Png, resize));
    let id = converter.add_bytes("wide.png", png_bytes(400, 300));
    converter.convert_pending();

    let converted = converter.get(id).unwrap().converted().unwrap();
    assert_eq!((converted.width, converted.height), (200, 150));
    let decoded = image::load_from_memory(converted.bytes()).unwrap();
    assert_eq!(decoded.dimensions(), (200, 150));
}

#[test]
fn explicit_mode_without_dimensions_is_a_configuration_error() {
    let resize = ResizePolicy {
        mode: ResizeMode::Explicit,
        ..ResizePolicy::default()
    };
    let mut converter = Converter::new(RustBackend::new(), settings(OutputFormat::Jpeg, resize));
    let id = converter.add_bytes("photo.png", png_bytes(40, 30));
    let summary = converter.convert_pending();

    assert_eq!(summary.failed, 1);
    assert_eq!(
        failure_kind(&converter.get(id).unwrap().status),
        Some(FailureKind::Configuration)
    );
}

#[test]
fn retry_with_new_settings_replaces_artifact_and_clears_saved_state() {
    let tmp = TempDir::new().unwrap();
    let store = FsGalleryStore::open(tmp.path()).unwrap();
    let mut converter =
        Converter::new(RustBackend::new(), settings(OutputFormat::Png, percentage(50.0)));
    let id = converter.add_bytes("photo.png", png_bytes(100, 60));
    converter.convert_pending();
    converter.save_to_gallery(id, &store).unwrap();
    let live_before = converter.previews().live_count();

    converter
        .settings()
        .update(|s| s.resize = percentage(25.0));
    converter.convert_one(id).unwrap();

    let item = converter.get(id).unwrap();
    let converted = item.converted().unwrap();
    assert_eq!((converted.width, converted.height), (25, 15));
    assert_eq!(item.save, SaveState::Unsaved);
    // The old artifact's preview was released when its replacement arrived.
    assert_eq!(converter.previews().live_count(), live_before);
    // The gallery copy is independent of the item.
    assert_eq!(store.list().unwrap().len(), 1);
}

#[test]
fn removing_items_releases_previews() {
    let mut converter =
        Converter::new(RustBackend::new(), settings(OutputFormat::Png, ResizePolicy::default()));
    let a = converter.add_bytes("a.png", png_bytes(8, 8));
    converter.add_bytes("b.png", png_bytes(8, 8));
    converter.convert_pending();
    // Two sources + two artifacts.
    assert_eq!(converter.previews().live_count(), 4);

    converter.remove(a).unwrap();
    assert_eq!(converter.previews().live_count(), 2);
    converter.clear();
    assert_eq!(converter.previews().live_count(), 0);
}
