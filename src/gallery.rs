//! Local gallery of converted images.
//!
//! Saved conversions outlive the session that produced them. The store is a
//! plain directory:
//!
//! ```text
//! <data dir>/cosmo-convert/gallery/
//! ├── .gallery-index.json                         # versioned index
//! ├── 3f2a…-…-9c1e.webp                           # one blob per item
//! └── 77b0…-…-0d42.avif
//! ```
//!
//! The index maps item ids to their metadata and a SHA-256 of the blob. A
//! missing index is an empty gallery. An index that cannot be read, does not
//! parse, or was written by another version is an error for every
//! operation, and nothing is written over it; blobs it points at are never
//! orphaned by a later save. A blob whose hash no longer matches is reported
//! as [`GalleryError::Corrupt`].

use crate::imaging::OutputFormat;
use crate::naming;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

/// Name of the index file within the gallery directory.
const INDEX_FILENAME: &str = ".gallery-index.json";

/// Version of the index format.
const INDEX_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid gallery id: {0:?}")]
    InvalidId(String),
    #[error("No gallery item with id {0}")]
    NotFound(String),
    #[error("Gallery item {0} is corrupt (content hash mismatch)")]
    Corrupt(String),
    #[error("Gallery index {path} is unreadable: {reason}")]
    UnreadableIndex { path: PathBuf, reason: String },
    #[error("Gallery index {path} has version {found}, expected {expected}")]
    IndexVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
}

/// A converted image kept in the local gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryItem {
    pub id: String,
    pub name: String,
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    pub created_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub size: u64,
}

impl GalleryItem {
    /// New item with a fresh id, timestamped now.
    pub fn new(name: &str, format: OutputFormat, width: u32, height: u32, bytes: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            size: bytes.len() as u64,
            bytes,
            format,
            created_at: Utc::now(),
            width,
            height,
        }
    }
}

/// Storage for gallery items.
pub trait GalleryStore {
    /// Insert, or overwrite the item with the same id.
    fn put(&self, item: &GalleryItem) -> Result<(), GalleryError>;

    /// All items, newest first; equal timestamps ordered by id.
    fn list(&self) -> Result<Vec<GalleryItem>, GalleryError>;

    fn get(&self, id: &str) -> Result<Option<GalleryItem>, GalleryError>;

    /// Remove an item. Deleting an unknown id succeeds.
    fn delete(&self, id: &str) -> Result<(), GalleryError>;
}

/// Index entry: everything about an item except its bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct IndexEntry {
    name: String,
    format: OutputFormat,
    created_at: DateTime<Utc>,
    width: u32,
    height: u32,
    size: u64,
    sha256: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct GalleryIndex {
    version: u32,
    items: HashMap<String, IndexEntry>,
}

impl GalleryIndex {
    fn empty() -> Self {
        Self {
            version: INDEX_VERSION,
            items: HashMap::new(),
        }
    }

    /// Load from the gallery directory. Only a missing file is an empty
    /// index; an unreadable or foreign-version file is an error.
    fn load(dir: &Path) -> Result<Self, GalleryError> {
        let path = dir.join(INDEX_FILENAME);
        let content = match std::fs::read(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::empty()),
            Err(e) => return Err(e.into()),
        };
        let index: Self = serde_json::from_slice(&content).map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "unreadable gallery index");
            GalleryError::UnreadableIndex {
                path: path.clone(),
                reason: e.to_string(),
            }
        })?;
        if index.version != INDEX_VERSION {
            tracing::warn!(
                path = %path.display(),
                found = index.version,
                expected = INDEX_VERSION,
                "gallery index version mismatch"
            );
            return Err(GalleryError::IndexVersion {
                path,
                found: index.version,
                expected: INDEX_VERSION,
            });
        }
        Ok(index)
    }

    /// Write via a temporary file so a crash never leaves a torn index.
    fn save(&self, dir: &Path) -> Result<(), GalleryError> {
        let path = dir.join(INDEX_FILENAME);
        let tmp = dir.join(format!("{INDEX_FILENAME}.tmp"));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// SHA-256 of a blob, returned as a hex string.
fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Ids become file names, so only a conservative alphabet is accepted.
fn check_id(id: &str) -> Result<(), GalleryError> {
    let ok = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(GalleryError::InvalidId(id.to_string()))
    }
}

fn blob_name(id: &str, format: OutputFormat) -> String {
    format!("{}.{}", id, format.extension())
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Default gallery location: `<user data dir>/cosmo-convert/gallery`.
pub fn default_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("cosmo-convert").join("gallery"))
}

/// Directory-backed [`GalleryStore`].
#[derive(Debug)]
pub struct FsGalleryStore {
    dir: PathBuf,
    /// Serializes index read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FsGalleryStore {
    /// Open (creating if needed) a gallery rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, GalleryError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_item(&self, id: &str, entry: &IndexEntry) -> Result<GalleryItem, GalleryError> {
        let bytes = std::fs::read(self.dir.join(blob_name(id, entry.format)))?;
        if hash_bytes(&bytes) != entry.sha256 {
            return Err(GalleryError::Corrupt(id.to_string()));
        }
        Ok(GalleryItem {
            id: id.to_string(),
            name: entry.name.clone(),
            bytes,
            format: entry.format,
            created_at: entry.created_at,
            width: entry.width,
            height: entry.height,
            size: entry.size,
        })
    }
}

impl GalleryStore for FsGalleryStore {
    fn put(&self, item: &GalleryItem) -> Result<(), GalleryError> {
        check_id(&item.id)?;
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut index = GalleryIndex::load(&self.dir)?;

        std::fs::write(self.dir.join(blob_name(&item.id, item.format)), &item.bytes)?;
        let previous = index.items.insert(
            item.id.clone(),
            IndexEntry {
                name: item.name.clone(),
                format: item.format,
                created_at: item.created_at,
                width: item.width,
                height: item.height,
                size: item.bytes.len() as u64,
                sha256: hash_bytes(&item.bytes),
            },
        );
        // Overwrite with a new format leaves the old blob behind otherwise
        if let Some(old) = previous
            && old.format != item.format
        {
            remove_if_present(&self.dir.join(blob_name(&item.id, old.format)))?;
        }
        index.save(&self.dir)
    }

    fn list(&self) -> Result<Vec<GalleryItem>, GalleryError> {
        let index = GalleryIndex::load(&self.dir)?;
        let mut entries: Vec<_> = index.items.iter().collect();
        entries.sort_by(|(a_id, a), (b_id, b)| {
            b.created_at.cmp(&a.created_at).then_with(|| a_id.cmp(b_id))
        });

        let mut items = Vec::with_capacity(entries.len());
        for (id, entry) in entries {
            match self.read_item(id, entry) {
                Ok(item) => items.push(item),
                Err(GalleryError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::warn!(id = %id, "gallery blob missing, skipping");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(items)
    }

    fn get(&self, id: &str) -> Result<Option<GalleryItem>, GalleryError> {
        check_id(id)?;
        let index = GalleryIndex::load(&self.dir)?;
        match index.items.get(id) {
            Some(entry) => self.read_item(id, entry).map(Some),
            None => Ok(None),
        }
    }

    fn delete(&self, id: &str) -> Result<(), GalleryError> {
        check_id(id)?;
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut index = GalleryIndex::load(&self.dir)?;
        if let Some(entry) = index.items.remove(id) {
            remove_if_present(&self.dir.join(blob_name(id, entry.format)))?;
            index.save(&self.dir)?;
        }
        Ok(())
    }
}

/// Write a gallery item to `dir` as `{name}.{ext}`.
pub fn export(store: &impl GalleryStore, id: &str, dir: &Path) -> Result<PathBuf, GalleryError> {
    let item = store
        .get(id)?
        .ok_or_else(|| GalleryError::NotFound(id.to_string()))?;
    std::fs::create_dir_all(dir)?;
    let path = dir.join(naming::file_name(&item.name, item.format));
    std::fs::write(&path, &item.bytes)?;
    Ok(path)
}
