//! REST client for a Supabase-compatible backend.
//!
//! | Operation | Request |
//! |---|---|
//! | upload | `POST /storage/v1/object/{bucket}/{key}` |
//! | public URL | `/storage/v1/object/public/{bucket}/{key}` (no request) |
//! | delete object | `DELETE /storage/v1/object/{bucket}` with `{"prefixes": [key]}` |
//! | insert row | `POST /rest/v1/{table}` with `Prefer: return=representation` |
//! | list rows | `GET /rest/v1/{table}?select=*&order=created_at.desc` |
//! | delete row | `DELETE /rest/v1/{table}?id=eq.{id}` |
//!
//! Every request carries the anon key as both `apikey` and bearer token.

use super::{CloudError, CloudRecord, CloudStore, NewCloudRecord};
use crate::config::CloudConfig;
use reqwest::blocking::{Client, Request, RequestBuilder, Response};
use std::time::Duration;
use url::Url;

/// Blocking client for storage and table operations.
///
/// Built from a [`CloudConfig`]; reconfiguring means building a new client.
#[derive(Debug, Clone)]
pub struct SupabaseClient {
    http: Client,
    base: Url,
    anon_key: String,
    bucket: String,
    table: String,
}

impl SupabaseClient {
    pub fn new(config: &CloudConfig) -> Result<Self, CloudError> {
        let (Some(url), Some(anon_key)) = (&config.url, &config.anon_key) else {
            return Err(CloudError::NotConfigured);
        };
        if !config.is_configured() {
            return Err(CloudError::NotConfigured);
        }
        let base = Url::parse(url.trim())?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(CloudError::InvalidUrl(url.clone()));
        }
        let http = Client::builder().timeout(Duration::from_secs(120)).build()?;

        tracing::debug!(base = %base, bucket = %config.bucket, table = %config.table, "cloud client initialized");
        Ok(Self {
            http,
            base,
            anon_key: anon_key.trim().to_string(),
            bucket: config.bucket.clone(),
            table: config.table.clone(),
        })
    }

    pub(super) fn base(&self) -> &Url {
        &self.base
    }

    pub(super) fn anon_key(&self) -> &str {
        &self.anon_key
    }

    pub(super) fn table(&self) -> &str {
        &self.table
    }

    /// Base URL with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, CloudError> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| CloudError::InvalidUrl(self.base.to_string()))?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
    }

    pub(super) fn upload_request(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<Request, CloudError> {
        let url = self.endpoint(&["storage", "v1", "object", &self.bucket, key])?;
        let request = self
            .authorized(self.http.post(url))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(bytes.to_vec())
            .build()?;
        Ok(request)
    }

    pub(super) fn delete_object_request(&self, key: &str) -> Result<Request, CloudError> {
        let url = self.endpoint(&["storage", "v1", "object", &self.bucket])?;
        let request = self
            .authorized(self.http.delete(url))
            .json(&serde_json::json!({ "prefixes": [key] }))
            .build()?;
        Ok(request)
    }

    pub(super) fn insert_request(&self, record: &NewCloudRecord) -> Result<Request, CloudError> {
        let url = self.endpoint(&["rest", "v1", &self.table])?;
        let request = self
            .authorized(self.http.post(url))
            .header("Prefer", "return=representation")
            .json(record)
            .build()?;
        Ok(request)
    }

    pub(super) fn list_request(&self) -> Result<Request, CloudError> {
        let mut url = self.endpoint(&["rest", "v1", &self.table])?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("order", "created_at.desc");
        Ok(self.authorized(self.http.get(url)).build()?)
    }

    pub(super) fn delete_record_request(&self, id: &str) -> Result<Request, CloudError> {
        let mut url = self.endpoint(&["rest", "v1", &self.table])?;
        url.query_pairs_mut().append_pair("id", &format!("eq.{id}"));
        Ok(self.authorized(self.http.delete(url)).build()?)
    }

    /// Execute and turn non-2xx responses into [`CloudError::Status`].
    fn send(&self, request: Request) -> Result<Response, CloudError> {
        let method = request.method().clone();
        let url = request.url().path().to_string();
        let response = self.http.execute(request)?;
        let status = response.status();
        if status.is_success() {
            tracing::debug!(%method, %url, %status, "cloud request ok");
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        tracing::debug!(%method, %url, %status, %body, "cloud request failed");
        Err(CloudError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

impl CloudStore for SupabaseClient {
    fn upload(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, CloudError> {
        self.send(self.upload_request(key, bytes, content_type)?)?;
        Ok(self.public_url(key))
    }

    fn public_url(&self, key: &str) -> String {
        match self.endpoint(&["storage", "v1", "object", "public", &self.bucket, key]) {
            Ok(url) => url.to_string(),
            // Unreachable: `new` rejects cannot-be-a-base URLs.
            Err(_) => String::new(),
        }
    }

    fn insert_metadata(&self, record: &NewCloudRecord) -> Result<CloudRecord, CloudError> {
        let rows: Vec<CloudRecord> = self.send(self.insert_request(record)?)?.json()?;
        rows.into_iter().next().ok_or(CloudError::EmptyResponse)
    }

    fn list(&self) -> Result<Vec<CloudRecord>, CloudError> {
        Ok(self.send(self.list_request()?)?.json()?)
    }

    fn delete_object(&self, key: &str) -> Result<(), CloudError> {
        self.send(self.delete_object_request(key)?)?;
        Ok(())
    }

    fn delete_record(&self, id: &str) -> Result<(), CloudError> {
        self.send(self.delete_record_request(id)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;

    fn config() -> CloudConfig {
        CloudConfig {
            url: Some("https://proj.supabase.co".into()),
            anon_key: Some("anon-key".into()),
            ..CloudConfig::default()
        }
    }

    fn client() -> SupabaseClient {
        SupabaseClient::new(&config()).unwrap()
    }

    fn header<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
        request.headers().get(name).and_then(|v| v.to_str().ok())
    }

    fn body_json(request: &Request) -> serde_json::Value {
        let bytes = request.body().and_then(|b| b.as_bytes()).unwrap();
        serde_json::from_slice(bytes).unwrap()
    }

    // =========================================================================
    // Construction
    // =========================================================================

    #[test]
    fn requires_url_and_key() {
        let missing_key = CloudConfig {
            anon_key: None,
            ..config()
        };
        assert!(matches!(
            SupabaseClient::new(&missing_key),
            Err(CloudError::NotConfigured)
        ));
        assert!(matches!(
            SupabaseClient::new(&CloudConfig::default()),
            Err(CloudError::NotConfigured)
        ));
    }

    #[test]
    fn rejects_non_http_url() {
        let bad = CloudConfig {
            url: Some("mailto:someone@example.com".into()),
            ..config()
        };
        assert!(matches!(SupabaseClient::new(&bad), Err(CloudError::InvalidUrl(_))));
    }

    // =========================================================================
    // Request building
    // =========================================================================

    #[test]
    fn upload_request_targets_bucket_object() {
        let request = client()
            .upload_request("1718000000000_beach.webp", b"bytes", "image/webp")
            .unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(
            request.url().as_str(),
            "https://proj.supabase.co/storage/v1/object/images/1718000000000_beach.webp"
        );
        assert_eq!(header(&request, "apikey"), Some("anon-key"));
        assert_eq!(header(&request, "authorization"), Some("Bearer anon-key"));
        assert_eq!(header(&request, "content-type"), Some("image/webp"));
        assert_eq!(request.body().and_then(|b| b.as_bytes()), Some(&b"bytes"[..]));
    }

    #[test]
    fn keys_are_percent_encoded() {
        let request = client()
            .upload_request("1_my photo?.webp", b"", "image/webp")
            .unwrap();
        assert_eq!(
            request.url().path(),
            "/storage/v1/object/images/1_my%20photo%3F.webp"
        );
        assert_eq!(request.url().query(), None);
    }

    #[test]
    fn base_path_is_preserved() {
        let proxied = CloudConfig {
            url: Some("https://gateway.example.com/supabase/".into()),
            ..config()
        };
        let request = SupabaseClient::new(&proxied).unwrap().list_request().unwrap();
        assert_eq!(request.url().path(), "/supabase/rest/v1/images");
    }

    #[test]
    fn public_url_shape() {
        assert_eq!(
            client().public_url("1_a.avif"),
            "https://proj.supabase.co/storage/v1/object/public/images/1_a.avif"
        );
    }

    #[test]
    fn insert_request_asks_for_representation() {
        let record = NewCloudRecord {
            original_name: "beach".into(),
            url: "https://cdn/1_beach.webp".into(),
            storage_key: "1_beach.webp".into(),
            format: "webp".into(),
            size: 10,
        };
        let request = client().insert_request(&record).unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.url().path(), "/rest/v1/images");
        assert_eq!(header(&request, "prefer"), Some("return=representation"));
        let body = body_json(&request);
        assert_eq!(body["storage_key"], "1_beach.webp");
        assert_eq!(body["size"], 10);
    }

    #[test]
    fn list_request_orders_newest_first() {
        let request = client().list_request().unwrap();
        assert_eq!(request.method(), Method::GET);
        assert_eq!(
            request.url().query(),
            Some("select=*&order=created_at.desc")
        );
    }

    #[test]
    fn delete_requests() {
        let c = client();
        let object = c.delete_object_request("1_a.webp").unwrap();
        assert_eq!(object.method(), Method::DELETE);
        assert_eq!(object.url().path(), "/storage/v1/object/images");
        assert_eq!(body_json(&object), serde_json::json!({"prefixes": ["1_a.webp"]}));

        let row = c.delete_record_request("42").unwrap();
        assert_eq!(row.method(), Method::DELETE);
        assert_eq!(row.url().query(), Some("id=eq.42"));
    }
}
