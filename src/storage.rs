//! Upload of inspection photos to the hosted storage bucket. Uploads are
//! strictly optional: a failed upload leaves the record photo-less but
//! otherwise intact.

use rand::distributions::Alphanumeric;
use rand::Rng;
use thiserror::Error;
use url::Url;

use crate::db_client::DatabaseConfig;

pub const PHOTO_BUCKET: &str = "storage";
pub const PHOTO_PATH_PREFIX: &str = "inspection-photos";

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Project base URL, without the `/rest/v1` suffix.
    pub base_url: String,
    pub anon_key: String,
    pub bucket: String,
}

impl StorageConfig {
    /// Derives the storage endpoint from the database configuration; both
    /// live under the same project host.
    pub fn from_database(config: &DatabaseConfig) -> Self {
        let base_url = config
            .rest_url
            .trim_end_matches("/rest/v1")
            .trim_end_matches('/')
            .to_string();
        Self {
            base_url,
            anon_key: config.anon_key.clone(),
            bucket: PHOTO_BUCKET.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("photo upload failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("photo upload rejected: HTTP {status}: {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("storage endpoint is not a valid URL: {0}")]
    BadEndpoint(#[from] url::ParseError),
}

pub struct StorageClient {
    config: StorageConfig,
    http: reqwest::Client,
}

impl std::fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageClient")
            .field("base_url", &self.config.base_url)
            .field("bucket", &self.config.bucket)
            .finish_non_exhaustive()
    }
}

impl StorageClient {
    pub fn new(config: StorageConfig) -> anyhow::Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {}", config.anon_key).parse()?,
        );
        headers.insert("apikey", config.anon_key.parse()?);
        let http = reqwest::Client::builder().default_headers(headers).build()?;
        Ok(Self { config, http })
    }

    /// Builds a collision-free object path under the photo prefix, keeping
    /// only a sanitized lowercase extension from the original file name.
    pub fn object_path(&self, file_name: &str) -> String {
        let ext = file_name
            .rsplit('.')
            .next()
            .filter(|ext| {
                !ext.is_empty()
                    && ext.len() <= 5
                    && ext.chars().all(|c| c.is_ascii_alphanumeric())
            })
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| "jpg".to_string());
        let millis = chrono::Utc::now().timestamp_millis();
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(|c| (c as char).to_ascii_lowercase())
            .collect();
        format!("{PHOTO_PATH_PREFIX}/{millis}-{nonce}.{ext}")
    }

    /// Uploads the photo bytes and returns the public URL of the new object.
    pub async fn upload_photo(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, UploadError> {
        let endpoint = format!(
            "{}/storage/v1/object/{}/{}",
            self.config.base_url, self.config.bucket, path
        );
        let response = self
            .http
            .post(&endpoint)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header(reqwest::header::CACHE_CONTROL, "3600")
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Rejected { status, body });
        }

        self.public_url(path)
    }

    /// Public (unauthenticated) URL of an object in the bucket.
    pub fn public_url(&self, path: &str) -> Result<String, UploadError> {
        // Validates that the configured base actually parses as a URL.
        Url::parse(&self.config.base_url)?;
        Ok(format!(
            "{}/storage/v1/object/public/{}/{}",
            self.config.base_url, self.config.bucket, path
        ))
    }
}
