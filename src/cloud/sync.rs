//! Upload orchestration and the local view of the cloud table.

use super::{CloudError, CloudRecord, CloudStore, NewCloudRecord};
use crate::imaging::OutputFormat;
use crate::naming;
use chrono::Utc;

/// Upload an image and record its metadata row.
///
/// The object key is `{unix_millis}_{name}.{ext}`, generated per call, so a
/// retry never overwrites an earlier attempt. If the upload fails no row is
/// written. If the row insert fails the object is deleted again; a failure
/// of that cleanup is logged and the insert error is returned.
pub fn upload_item(
    store: &impl CloudStore,
    name: &str,
    format: OutputFormat,
    bytes: &[u8],
) -> Result<CloudRecord, CloudError> {
    let key = naming::object_key(Utc::now().timestamp_millis(), name, format);
    let url = store.upload(&key, bytes, format.mime_type())?;
    tracing::debug!(%key, %url, "uploaded object");

    let record = NewCloudRecord {
        original_name: name.to_string(),
        url,
        storage_key: key.clone(),
        format: format.extension().to_string(),
        size: bytes.len() as u64,
    };
    match store.insert_metadata(&record) {
        Ok(row) => Ok(row),
        Err(err) => {
            tracing::warn!(%key, error = %err, "metadata insert failed; removing uploaded object");
            if let Err(cleanup) = store.delete_object(&key) {
                tracing::warn!(%key, error = %cleanup, "could not remove orphaned object");
            }
            Err(err)
        }
    }
}

/// Newest-first list of cloud records, unique by id.
///
/// Records arrive from three places that overlap: a full
/// [`refresh`](Self::refresh), the row returned by an insert, and the
/// realtime echo of that same insert. Each id is kept once.
#[derive(Debug, Default, Clone)]
pub struct CloudFeed {
    records: Vec<CloudRecord>,
}

impl CloudFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[CloudRecord] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&CloudRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Replace the contents with a fresh listing.
    pub fn refresh(&mut self, store: &impl CloudStore) -> Result<(), CloudError> {
        let listed = store.list()?;
        self.records.clear();
        for record in listed {
            self.insert(record);
        }
        Ok(())
    }

    /// Add a record in `created_at` order. Returns `false` if the id is
    /// already present.
    pub fn insert(&mut self, record: CloudRecord) -> bool {
        if self.get(&record.id).is_some() {
            return false;
        }
        let at = self
            .records
            .iter()
            .position(|r| r.created_at < record.created_at)
            .unwrap_or(self.records.len());
        self.records.insert(at, record);
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<CloudRecord> {
        let index = self.records.iter().position(|r| r.id == id)?;
        Some(self.records.remove(index))
    }

    /// Delete a listed record from the backend (object, then row) and drop
    /// it from the feed. The feed is unchanged if the backend refuses.
    pub fn delete(&mut self, store: &impl CloudStore, id: &str) -> Result<CloudRecord, CloudError> {
        let record = self
            .get(id)
            .ok_or_else(|| CloudError::UnknownRecord(id.to_string()))?;
        store.delete(record)?;
        self.remove(id)
            .ok_or_else(|| CloudError::UnknownRecord(id.to_string()))
    }
}
