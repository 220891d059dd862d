use async_trait::async_trait;
use reqwest::{header, Url};
use tracing::debug;

use super::{Namespace, ObjectStore, StorageError};

/// Object store backed by the Cloud Storage JSON API. Media uploads replace
/// an existing object of the same name.
#[derive(Clone)]
pub struct GcsObjectStore {
    client: reqwest::Client,
    upload_url: Url,
    bucket: String,
}

impl GcsObjectStore {
    pub fn new(client: reqwest::Client, endpoint: &str, bucket: &str) -> Result<Self, url::ParseError> {
        let upload_url = Url::parse(endpoint)?.join(&format!("upload/storage/v1/b/{bucket}/o"))?;

        Ok(Self {
            client,
            upload_url,
            bucket: bucket.to_owned(),
        })
    }

    pub fn object_name(namespace: Namespace, key: &str) -> String {
        format!("{}/{}", namespace.as_str(), key)
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn put(
        &self,
        namespace: Namespace,
        key: &str,
        body: Vec<u8>,
    ) -> Result<(), StorageError> {
        let name = Self::object_name(namespace, key);

        let response = self
            .client
            .post(self.upload_url.clone())
            .query(&[("uploadType", "media"), ("name", name.as_str())])
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Status { status, body });
        }

        debug!(bucket = %self.bucket, object = %name, "stored object");
        Ok(())
    }
}
