//! Cloud sync: object storage + metadata table + realtime insert feed.
//!
//! The backend is any Supabase-compatible service. Uploading an image is two
//! requests: the bytes go to a storage bucket, then a metadata row pointing
//! at the public URL goes into a table. Other clients learn about new rows
//! through the realtime websocket.
//!
//! | Piece | Type |
//! |---|---|
//! | Storage + table operations | [`CloudStore`] trait, [`SupabaseClient`] (blocking `reqwest`) |
//! | Insert feed | [`SupabaseClient::subscribe_inserts`] → [`Subscription`] (`tungstenite`) |
//! | Upload with rollback | [`sync::upload_item`] |
//! | Local view of the table | [`sync::CloudFeed`] |
//!
//! Every record stores the object key it was uploaded under, so deleting a
//! record never has to reverse-engineer the key from its URL.

mod realtime;
mod supabase;
pub mod sync;

pub use realtime::{RealtimeEvent, Subscription, parse_message};
pub use supabase::SupabaseClient;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Cloud backend is not configured (set cloud.url and cloud.anon_key)")]
    NotConfigured,
    #[error("Invalid cloud URL: {0}")]
    InvalidUrl(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Cloud backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Realtime connection error: {0}")]
    WebSocket(Box<tungstenite::Error>),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Insert returned no row")]
    EmptyResponse,
    #[error("No cloud image with id {0}")]
    UnknownRecord(String),
}

impl From<tungstenite::Error> for CloudError {
    fn from(e: tungstenite::Error) -> Self {
        CloudError::WebSocket(Box::new(e))
    }
}

impl From<url::ParseError> for CloudError {
    fn from(e: url::ParseError) -> Self {
        CloudError::InvalidUrl(e.to_string())
    }
}

/// A row of the metadata table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudRecord {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub created_at: DateTime<Utc>,
    pub original_name: String,
    /// Public URL of the stored object.
    pub url: String,
    /// Object key inside the bucket. Rows written by older clients lack it.
    #[serde(default)]
    pub storage_key: Option<String>,
    /// File extension of the stored image (`webp`, `avif`, ...).
    pub format: String,
    #[serde(default)]
    pub size: u64,
}

/// Columns supplied on insert; the backend assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewCloudRecord {
    pub original_name: String,
    pub url: String,
    pub storage_key: String,
    pub format: String,
    pub size: u64,
}

/// Ids are uuids or bigints depending on the table definition.
fn id_as_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }
    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

/// RFC 3339, or a bare timestamp taken as UTC (realtime payloads sometimes
/// omit the offset).
fn lenient_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("bad timestamp: {raw}")))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Storage bucket + metadata table operations.
pub trait CloudStore {
    /// Store `bytes` under `key`; returns the object's public URL.
    fn upload(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, CloudError>;

    fn public_url(&self, key: &str) -> String;

    fn insert_metadata(&self, record: &NewCloudRecord) -> Result<CloudRecord, CloudError>;

    /// All records, newest first.
    fn list(&self) -> Result<Vec<CloudRecord>, CloudError>;

    fn delete_object(&self, key: &str) -> Result<(), CloudError>;

    fn delete_record(&self, id: &str) -> Result<(), CloudError>;

    /// Remove the stored object, then the row.
    fn delete(&self, record: &CloudRecord) -> Result<(), CloudError> {
        match &record.storage_key {
            Some(key) => self.delete_object(key)?,
            None => tracing::warn!(
                id = %record.id,
                "record has no storage key; removing the row only"
            ),
        }
        self.delete_record(&record.id)
    }
}

#[cfg(test)]
pub mod fake {
    //! In-memory [`CloudStore`] for tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeCloud {
        pub objects: Mutex<HashMap<String, Vec<u8>>>,
        pub rows: Mutex<Vec<CloudRecord>>,
        pub calls: Mutex<Vec<String>>,
        pub fail_upload: bool,
        pub fail_insert: bool,
        pub fail_delete_object: bool,
    }

    impl FakeCloud {
        fn call(&self, what: String) {
            self.calls.lock().unwrap().push(what);
        }

        pub fn get_calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn refused(&self, what: &str) -> CloudError {
            CloudError::Status {
                status: 500,
                body: format!("{what} refused"),
            }
        }
    }

    impl CloudStore for FakeCloud {
        fn upload(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, CloudError> {
            self.call(format!("upload {key} {content_type}"));
            if self.fail_upload {
                return Err(self.refused("upload"));
            }
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), bytes.to_vec());
            Ok(self.public_url(key))
        }

        fn public_url(&self, key: &str) -> String {
            format!("https://cdn.test/{key}")
        }

        fn insert_metadata(&self, record: &NewCloudRecord) -> Result<CloudRecord, CloudError> {
            self.call(format!("insert {}", record.storage_key));
            if self.fail_insert {
                return Err(self.refused("insert"));
            }
            let mut rows = self.rows.lock().unwrap();
            let row = CloudRecord {
                id: (rows.len() + 1).to_string(),
                created_at: Utc::now(),
                original_name: record.original_name.clone(),
                url: record.url.clone(),
                storage_key: Some(record.storage_key.clone()),
                format: record.format.clone(),
                size: record.size,
            };
            rows.insert(0, row.clone());
            Ok(row)
        }

        fn list(&self) -> Result<Vec<CloudRecord>, CloudError> {
            self.call("list".to_string());
            Ok(self.rows.lock().unwrap().clone())
        }

        fn delete_object(&self, key: &str) -> Result<(), CloudError> {
            self.call(format!("delete_object {key}"));
            if self.fail_delete_object {
                return Err(self.refused("delete"));
            }
            self.objects.lock().unwrap().remove(key);
            Ok(())
        }

        fn delete_record(&self, id: &str) -> Result<(), CloudError> {
            self.call(format!("delete_record {id}"));
            self.rows.lock().unwrap().retain(|r| r.id != id);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeCloud;
    use super::*;

    #[test]
    fn record_parses_rest_row() {
        let json = r#"{
            "id": "5d1c2f1e-1111-2222-3333-444455556666",
            "created_at": "2024-06-10T12:00:00.123456+00:00",
            "original_name": "beach",
            "url": "https://x.supabase.co/storage/v1/object/public/images/1_beach.webp",
            "storage_key": "1_beach.webp",
            "format": "webp",
            "size": 2048,
            "owner": "ignored"
        }"#;
        let record: CloudRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.original_name, "beach");
        assert_eq!(record.storage_key.as_deref(), Some("1_beach.webp"));
        assert_eq!(record.size, 2048);
        assert_eq!(record.created_at.timestamp(), 1718020800);
    }

    #[test]
    fn record_accepts_numeric_id_and_bare_timestamp() {
        let json = r#"{
            "id": 42,
            "created_at": "2024-06-10T12:00:00.5",
            "original_name": "a",
            "url": "u",
            "format": "avif"
        }"#;
        let record: CloudRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, "42");
        assert_eq!(record.storage_key, None);
        assert_eq!(record.size, 0);
        assert_eq!(record.created_at.timestamp(), 1718020800);
    }

    #[test]
    fn record_rejects_garbage_timestamp() {
        let json = r#"{"id": 1, "created_at": "yesterday", "original_name": "a", "url": "u", "format": "webp"}"#;
        assert!(serde_json::from_str::<CloudRecord>(json).is_err());
    }

    #[test]
    fn delete_removes_object_then_row() {
        let cloud = FakeCloud::default();
        let record = cloud
            .insert_metadata(&NewCloudRecord {
                original_name: "a".into(),
                url: "https://cdn.test/1_a.webp".into(),
                storage_key: "1_a.webp".into(),
                format: "webp".into(),
                size: 3,
            })
            .unwrap();
        cloud.delete(&record).unwrap();
        let calls = cloud.get_calls();
        assert_eq!(&calls[1..], ["delete_object 1_a.webp", "delete_record 1"]);
        assert!(cloud.list().unwrap().is_empty());
    }

    #[test]
    fn delete_without_key_only_removes_row() {
        let cloud = FakeCloud::default();
        let record = CloudRecord {
            id: "7".into(),
            created_at: Utc::now(),
            original_name: "legacy".into(),
            url: "https://cdn.test/legacy.webp".into(),
            storage_key: None,
            format: "webp".into(),
            size: 1,
        };
        cloud.delete(&record).unwrap();
        assert_eq!(cloud.get_calls(), vec!["delete_record 7"]);
    }
}
