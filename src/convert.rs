//! Conversion orchestrator.
//!
//! Holds the session's images and drives each through its state machine:
//!
//! ```text
//! Pending ──start──▶ Converting ──ok──▶ Done(ConvertedImage)
//!    ▲                    │   ▲
//!    │                    └───┼──err─▶ Error(ItemFailure)
//!    │                        │             │
//!    │                        └──retry──────┘ (Done and Error may restart)
//! ```
//!
//! ## Batches
//!
//! [`Converter::convert_pending`] snapshots the ids that are pending when it
//! is called and converts them one at a time. A failure is recorded on its
//! item and the batch moves on. Settings are read from the shared
//! [`SettingsHandle`] as each item starts, so a change made from another
//! thread mid-batch applies to every item that has not started yet.
//!
//! ## Saved / uploaded state
//!
//! Every conversion attempt bumps the item's revision and resets its saved
//! and uploaded flags, since they described the previous artifact. Uploads
//! use a ticket ([`Converter::begin_upload`]) carrying the revision it was
//! taken at; [`Converter::finish_upload`] only marks the item uploaded when
//! that revision is still current.
//!
//! ## Progress
//!
//! With an event sender attached, the converter emits [`ConvertEvent`]s that
//! the CLI formats via [`output::format_convert_event`](crate::output::format_convert_event).

use crate::gallery::{GalleryError, GalleryItem, GalleryStore};
use crate::imaging::{
    BackendError, ConversionError, ConversionRequest, Dimensions, ImageBackend, OutputFormat,
    PlanError, convert_image,
};
use crate::naming;
use crate::preview::{PreviewHandle, PreviewRegistry};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use uuid::Uuid;

/// Settings applied to a conversion.
pub type ConvertSettings = ConversionRequest;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Gallery error: {0}")]
    Gallery(#[from] GalleryError),
    #[error("No item with id {0}")]
    UnknownItem(ItemId),
    #[error("Item {0} has not been converted")]
    NotConverted(ItemId),
    #[error("Item {0} is already being uploaded")]
    UploadInProgress(ItemId),
    #[error("Name must not be empty")]
    EmptyName,
}

/// Session-unique item identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(Uuid);

impl ItemId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a conversion failed. None of these stop a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The resize settings cannot produce a size; nothing was encoded.
    Configuration,
    /// The encoder cannot produce the requested format.
    UnsupportedFormat,
    /// The source is not a readable image.
    Decode,
    Encode,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::Configuration => "configuration",
            FailureKind::UnsupportedFormat => "unsupported format",
            FailureKind::Decode => "decode",
            FailureKind::Encode => "encode",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&ConversionError> for ItemFailure {
    fn from(err: &ConversionError) -> Self {
        let kind = match err {
            ConversionError::Plan(PlanError::EmptySource { .. }) => FailureKind::Decode,
            ConversionError::Plan(_) => FailureKind::Configuration,
            ConversionError::Backend(BackendError::Io(_) | BackendError::Decode(_)) => {
                FailureKind::Decode
            }
            ConversionError::Backend(BackendError::UnsupportedFormat(_)) => {
                FailureKind::UnsupportedFormat
            }
            ConversionError::Backend(BackendError::EncodeFailed(_)) => FailureKind::Encode,
            ConversionError::FormatMismatch { .. } => FailureKind::UnsupportedFormat,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

/// The artifact of a successful conversion.
#[derive(Debug)]
pub struct ConvertedImage {
    /// Format the encoder actually produced.
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub size: u64,
    preview: PreviewHandle,
}

impl ConvertedImage {
    pub fn bytes(&self) -> &[u8] {
        self.preview.bytes()
    }

    pub fn preview_url(&self) -> String {
        self.preview.url()
    }
}

#[derive(Debug)]
pub enum ItemStatus {
    Pending,
    Converting,
    Done(ConvertedImage),
    Error(ItemFailure),
}

impl ItemStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Converting => "converting",
            ItemStatus::Done(_) => "done",
            ItemStatus::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SaveState {
    #[default]
    Unsaved,
    Saved {
        gallery_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CloudState {
    #[default]
    NotUploaded,
    Uploading,
    Uploaded {
        url: String,
    },
}

/// One selected image and everything the session knows about it.
#[derive(Debug)]
pub struct ImageItem {
    pub id: ItemId,
    pub name: String,
    /// Native size, once the source has been identified.
    pub original: Option<Dimensions>,
    pub original_size: u64,
    pub status: ItemStatus,
    pub save: SaveState,
    pub cloud: CloudState,
    source: PreviewHandle,
    revision: u64,
}

impl ImageItem {
    pub fn source(&self) -> &[u8] {
        self.source.bytes()
    }

    pub fn preview_url(&self) -> String {
        self.source.url()
    }

    pub fn converted(&self) -> Option<&ConvertedImage> {
        match &self.status {
            ItemStatus::Done(converted) => Some(converted),
            _ => None,
        }
    }

    /// Incremented at the start of every conversion attempt.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

/// Live settings shared with other threads. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle(Arc<RwLock<ConvertSettings>>);

impl SettingsHandle {
    pub fn new(settings: ConvertSettings) -> Self {
        Self(Arc::new(RwLock::new(settings)))
    }

    /// Snapshot of the current settings.
    pub fn get(&self) -> ConvertSettings {
        *self.0.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, settings: ConvertSettings) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = settings;
    }

    pub fn update(&self, f: impl FnOnce(&mut ConvertSettings)) {
        f(&mut self.0.write().unwrap_or_else(|e| e.into_inner()));
    }
}

/// Requests to skip items in a running batch. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<Mutex<HashSet<ItemId>>>);

impl CancelHandle {
    pub fn cancel(&self, id: ItemId) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).insert(id);
    }

    /// Consume a pending cancellation for `id`.
    fn take(&self, id: ItemId) -> bool {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).remove(&id)
    }
}

/// Progress reported while converting.
#[derive(Debug, Clone, PartialEq)]
pub enum ConvertEvent {
    BatchStarted {
        count: usize,
    },
    ItemStarted {
        id: ItemId,
        name: String,
    },
    ItemConverted {
        id: ItemId,
        name: String,
        original: Dimensions,
        original_size: u64,
        width: u32,
        height: u32,
        format: OutputFormat,
        size: u64,
    },
    ItemFailed {
        id: ItemId,
        name: String,
        failure: ItemFailure,
    },
    ItemSkipped {
        id: ItemId,
    },
    BatchFinished(BatchSummary),
}

/// What happened to one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Converted,
    Failed,
    /// Cancelled, removed, or already converting.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub converted: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Converted => self.converted += 1,
            ItemOutcome::Failed => self.failed += 1,
            ItemOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.converted + self.failed + self.skipped
    }
}

/// A claim on an item's current artifact for uploading.
#[derive(Debug, Clone)]
pub struct UploadTicket {
    pub id: ItemId,
    pub name: String,
    pub format: OutputFormat,
    pub bytes: Arc<[u8]>,
    revision: u64,
}

/// What [`Converter::deliver`] did with one converted item. `None` means the
/// destination was not requested.
#[derive(Debug)]
pub struct Delivery {
    pub id: ItemId,
    pub name: String,
    pub written: Option<Result<PathBuf, ConvertError>>,
    pub saved: Option<Result<GalleryItem, ConvertError>>,
}

impl Delivery {
    pub fn failed(&self) -> bool {
        matches!(self.written, Some(Err(_))) || matches!(self.saved, Some(Err(_)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The item now records the upload.
    Recorded,
    /// The item was reconverted or removed while the upload ran.
    Stale,
}

/// Owns the session's items and converts them with backend `B`.
pub struct Converter<B: ImageBackend> {
    backend: B,
    items: Vec<ImageItem>,
    previews: PreviewRegistry,
    settings: SettingsHandle,
    cancel: CancelHandle,
    events: Option<Sender<ConvertEvent>>,
}

impl<B: ImageBackend> Converter<B> {
    pub fn new(backend: B, settings: ConvertSettings) -> Self {
        Self {
            backend,
            items: Vec::new(),
            previews: PreviewRegistry::new(),
            settings: SettingsHandle::new(settings),
            cancel: CancelHandle::default(),
            events: None,
        }
    }

    /// Emit progress events to `sender`.
    pub fn with_events(mut self, sender: Sender<ConvertEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn settings(&self) -> SettingsHandle {
        self.settings.clone()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn previews(&self) -> &PreviewRegistry {
        &self.previews
    }

    fn emit(&self, event: ConvertEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver only means nobody is listening.
            let _ = tx.send(event);
        }
    }

    fn index_of(&self, id: ItemId) -> Result<usize, ConvertError> {
        self.items
            .iter()
            .position(|item| item.id == id)
            .ok_or(ConvertError::UnknownItem(id))
    }

    // =========================================================================
    // Item lifecycle
    // =========================================================================

    /// Add a selected file. The display name is the file name without its
    /// last extension.
    pub fn add_bytes(&mut self, file_name: &str, bytes: Vec<u8>) -> ItemId {
        let id = ItemId::new();
        let original = self.backend.identify(&bytes).ok();
        let original_size = bytes.len() as u64;
        self.items.push(ImageItem {
            id,
            name: naming::display_name(file_name),
            original,
            original_size,
            status: ItemStatus::Pending,
            save: SaveState::Unsaved,
            cloud: CloudState::NotUploaded,
            source: self.previews.register(bytes),
            revision: 0,
        });
        id
    }

    /// Read and add a file from disk.
    pub fn add_file(&mut self, path: &Path) -> Result<ItemId, ConvertError> {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(self.add_bytes(&file_name, bytes))
    }

    pub fn get(&self, id: ItemId) -> Option<&ImageItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Items in the order they were added.
    pub fn items(&self) -> &[ImageItem] {
        &self.items
    }

    pub fn rename(&mut self, id: ItemId, name: &str) -> Result<(), ConvertError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ConvertError::EmptyName);
        }
        let index = self.index_of(id)?;
        self.items[index].name = name.to_string();
        Ok(())
    }

    /// Remove an item, releasing its previews.
    pub fn remove(&mut self, id: ItemId) -> Result<(), ConvertError> {
        let index = self.index_of(id)?;
        self.items.remove(index);
        Ok(())
    }

    /// Remove every item.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    // =========================================================================
    // Conversion
    // =========================================================================

    /// Convert one item regardless of its current state, unless it is
    /// already converting.
    pub fn convert_one(&mut self, id: ItemId) -> Result<ItemOutcome, ConvertError> {
        let index = self.index_of(id)?;
        Ok(self.run(index))
    }

    /// Convert every item pending at the time of the call, in order.
    pub fn convert_pending(&mut self) -> BatchSummary {
        let ids: Vec<ItemId> = self
            .items
            .iter()
            .filter(|item| matches!(item.status, ItemStatus::Pending))
            .map(|item| item.id)
            .collect();
        self.emit(ConvertEvent::BatchStarted { count: ids.len() });

        let mut summary = BatchSummary::default();
        for id in ids {
            let outcome = match self.index_of(id) {
                Ok(index) if !self.cancel.take(id) => self.run(index),
                _ => {
                    self.emit(ConvertEvent::ItemSkipped { id });
                    ItemOutcome::Skipped
                }
            };
            summary.record(outcome);
        }

        self.emit(ConvertEvent::BatchFinished(summary));
        summary
    }

    fn run(&mut self, index: usize) -> ItemOutcome {
        if matches!(self.items[index].status, ItemStatus::Converting) {
            return ItemOutcome::Skipped;
        }
        let settings = self.settings.get();

        let item = &mut self.items[index];
        // Dropping the previous artifact releases its preview.
        item.status = ItemStatus::Converting;
        item.revision += 1;
        item.save = SaveState::Unsaved;
        item.cloud = CloudState::NotUploaded;
        let (id, name) = (item.id, item.name.clone());
        let source = item.source.shared_bytes();
        self.emit(ConvertEvent::ItemStarted {
            id,
            name: name.clone(),
        });

        let result = convert_image(&self.backend, &source, &settings);

        let item = &mut self.items[index];
        let (event, outcome) = match result {
            Ok(conversion) => {
                let encoded = conversion.encoded;
                let size = encoded.bytes.len() as u64;
                item.original = Some(conversion.native);
                let event = ConvertEvent::ItemConverted {
                    id,
                    name,
                    original: conversion.native,
                    original_size: item.original_size,
                    width: encoded.width,
                    height: encoded.height,
                    format: encoded.format,
                    size,
                };
                item.status = ItemStatus::Done(ConvertedImage {
                    format: encoded.format,
                    width: encoded.width,
                    height: encoded.height,
                    size,
                    preview: self.previews.register(encoded.bytes),
                });
                (event, ItemOutcome::Converted)
            }
            Err(err) => {
                let failure = ItemFailure::from(&err);
                item.status = ItemStatus::Error(failure.clone());
                (ConvertEvent::ItemFailed { id, name, failure }, ItemOutcome::Failed)
            }
        };
        self.emit(event);
        outcome
    }

    // =========================================================================
    // Using the converted artifact
    // =========================================================================

    fn converted(&self, id: ItemId) -> Result<(&ImageItem, &ConvertedImage), ConvertError> {
        let item = self.get(id).ok_or(ConvertError::UnknownItem(id))?;
        let converted = item.converted().ok_or(ConvertError::NotConverted(id))?;
        Ok((item, converted))
    }

    /// Write the converted image to `dir` as `{name}.{ext}`.
    pub fn download(&self, id: ItemId, dir: &Path) -> Result<PathBuf, ConvertError> {
        let (item, converted) = self.converted(id)?;
        std::fs::create_dir_all(dir)?;
        let path = dir.join(naming::file_name(&item.name, converted.format));
        std::fs::write(&path, converted.bytes())?;
        Ok(path)
    }

    /// Store the converted image in the gallery and mark the item saved.
    pub fn save_to_gallery(
        &mut self,
        id: ItemId,
        store: &impl GalleryStore,
    ) -> Result<GalleryItem, ConvertError> {
        let (item, converted) = self.converted(id)?;
        let gallery_item = GalleryItem::new(
            &item.name,
            converted.format,
            converted.width,
            converted.height,
            converted.bytes().to_vec(),
        );
        store.put(&gallery_item)?;

        let index = self.index_of(id)?;
        self.items[index].save = SaveState::Saved {
            gallery_id: gallery_item.id.clone(),
        };
        Ok(gallery_item)
    }

    /// Write and/or save every converted item.
    ///
    /// Each item is handled on its own: a failed write or save is recorded in
    /// that item's [`Delivery`] and the remaining items still go out.
    pub fn deliver(
        &mut self,
        out: Option<&Path>,
        store: Option<&impl GalleryStore>,
    ) -> Vec<Delivery> {
        let ids: Vec<ItemId> = self
            .items
            .iter()
            .filter(|item| item.converted().is_some())
            .map(|item| item.id)
            .collect();
        ids.into_iter()
            .map(|id| {
                let name = self.get(id).map(|item| item.name.clone()).unwrap_or_default();
                let written = out.map(|dir| self.download(id, dir));
                let saved = store.map(|store| self.save_to_gallery(id, store));
                Delivery {
                    id,
                    name,
                    written,
                    saved,
                }
            })
            .collect()
    }

    /// Claim the current artifact for an upload.
    pub fn begin_upload(&mut self, id: ItemId) -> Result<UploadTicket, ConvertError> {
        let (item, converted) = self.converted(id)?;
        if item.cloud == CloudState::Uploading {
            return Err(ConvertError::UploadInProgress(id));
        }
        let ticket = UploadTicket {
            id,
            name: item.name.clone(),
            format: converted.format,
            bytes: converted.preview.shared_bytes(),
            revision: item.revision,
        };
        let index = self.index_of(id)?;
        self.items[index].cloud = CloudState::Uploading;
        Ok(ticket)
    }

    fn current(&mut self, ticket: &UploadTicket) -> Option<&mut ImageItem> {
        self.items
            .iter_mut()
            .find(|item| item.id == ticket.id)
            .filter(|item| item.revision == ticket.revision && item.cloud == CloudState::Uploading)
    }

    /// Record a finished upload if the ticket still describes the item.
    pub fn finish_upload(&mut self, ticket: &UploadTicket, url: &str) -> UploadOutcome {
        match self.current(ticket) {
            Some(item) => {
                item.cloud = CloudState::Uploaded {
                    url: url.to_string(),
                };
                UploadOutcome::Recorded
            }
            None => UploadOutcome::Stale,
        }
    }

    /// Release a ticket whose upload failed.
    pub fn abort_upload(&mut self, ticket: &UploadTicket) {
        if let Some(item) = self.current(ticket) {
            item.cloud = CloudState::NotUploaded;
        }
    }
}
