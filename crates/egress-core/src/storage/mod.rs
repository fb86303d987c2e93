//! Object-storage driver
//!
//! A thin, swappable boundary over S3-compatible object storage. The batch
//! router and the warehouse uploader never talk to `aws-sdk-s3` directly;
//! they go through [`ObjectStorageDriver`], so a GCS or Azure Blob adapter
//! can be dropped in later without touching pipeline logic.
//!
//! # Key Path Conventions
//!
//! Raw batches: `{folder}/{source_id}/{MM-DD-YYYY}/{filename}`
//! Load files: `{load_objects_folder}/{table}/{source_id}/{upload_id}/{filename}`

use async_trait::async_trait;
use anyhow::{anyhow, Context, Result};
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use tracing::{debug, info, instrument};

pub mod config;

use config::ObjectStorageConfig;

/// Result of a successful upload operation.
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub bucket: String,
    pub key: String,
    pub checksum: String,
    pub size: i64,
}

impl UploadResult {
    /// The object's `s3://` location, as stored in journal entries and
    /// staging-file / load-file catalog rows.
    pub fn location(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

/// Object-storage operations the pipeline depends on.
///
/// Grounded in the S3 adapter the teacher's storage client already
/// implements; generalized so a destination's bucket is supplied per call
/// instead of being fixed at construction time, since the router and
/// uploader address many buckets from a single client.
#[async_trait]
pub trait ObjectStorageDriver: Send + Sync {
    async fn upload(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<UploadResult>;
    async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;
}

/// S3-compatible implementation of [`ObjectStorageDriver`] (AWS S3, MinIO,
/// or GCS in S3-compatibility mode).
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
}

impl S3Storage {
    /// Creates a new client from configuration. One client is shared across
    /// all buckets the process needs to reach.
    pub async fn new(config: &ObjectStorageConfig) -> Result<Self> {
        debug!("initializing object storage client, region={}", config.region);

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "egress-storage",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());

        info!("object storage client initialized");

        Ok(Self { client })
    }
}

#[async_trait]
impl ObjectStorageDriver for S3Storage {
    #[instrument(skip(self, data))]
    async fn upload(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<UploadResult> {
        let checksum = calculate_sha256(&data);
        let size = data.len() as i64;

        debug!("uploading {} bytes to s3://{}/{}", size, bucket, key);

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .context("failed to upload object")?;

        info!("uploaded s3://{}/{}", bucket, key);

        Ok(UploadResult {
            bucket: bucket.to_string(),
            key: key.to_string(),
            checksum,
            size,
        })
    }

    #[instrument(skip(self))]
    async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        debug!("downloading s3://{}/{}", bucket, key);

        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed to download s3://{}/{}", bucket, key))?;

        let data = response
            .body
            .collect()
            .await
            .context("failed to read object body")?
            .into_bytes()
            .to_vec();

        debug!("downloaded {} bytes from s3://{}/{}", data.len(), bucket, key);

        Ok(data)
    }

    #[instrument(skip(self))]
    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        debug!("deleting s3://{}/{}", bucket, key);

        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed to delete s3://{}/{}", bucket, key))?;

        Ok(())
    }
}

/// Extracts the region component from an `https://s3.<region>.amazonaws.com/...`
/// style URL. Defaults to [`config::DEFAULT_S3_REGION`] when absent, matching
/// the fallback a warehouse `COPY` statement needs when a manifest entry's
/// host doesn't carry a region (e.g. path-style MinIO URLs).
pub fn region_from_url(url: &str) -> String {
    url.split('.')
        .find(|segment| segment.starts_with("s3-") || segment.starts_with("s3"))
        .and_then(|_| {
            let host = url.split("://").nth(1)?;
            let mut parts = host.split('.');
            let first = parts.next()?;
            if first == "s3" {
                let second = parts.next()?;
                if second != "amazonaws" {
                    return Some(second.to_string());
                }
            }
            None
        })
        .unwrap_or_else(|| config::DEFAULT_S3_REGION.to_string())
}

fn calculate_sha256(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_sha256() {
        let checksum = calculate_sha256(b"Hello, World!");
        assert_eq!(checksum, "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f");
    }

    #[test]
    fn test_upload_result_location() {
        let result = UploadResult {
            bucket: "rudder-logs".to_string(),
            key: "raw/src1/07-28-2026/file.json.gz".to_string(),
            checksum: "abc".to_string(),
            size: 10,
        };
        assert_eq!(result.location(), "s3://rudder-logs/raw/src1/07-28-2026/file.json.gz");
    }

    #[test]
    fn test_region_from_url_defaults() {
        assert_eq!(region_from_url("http://localhost:9000/bucket/key"), "us-east-1");
    }

    #[test]
    fn test_region_from_url_extracted() {
        assert_eq!(
            region_from_url("https://s3.us-west-2.amazonaws.com/bucket/key"),
            "us-west-2"
        );
    }
}
