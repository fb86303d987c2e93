//! Object-storage configuration
//!
//! Configuration for S3-compatible object storage backends (AWS S3, MinIO,
//! GCS in S3-compatibility mode). Supports loading from environment
//! variables or direct construction.

use serde::{Deserialize, Serialize};
use std::env;

/// Default S3 region used when a destination's region cannot be inferred.
pub const DEFAULT_S3_REGION: &str = "us-east-1";

/// Default bucket name when not specified via environment variable.
pub const DEFAULT_S3_BUCKET: &str = "egress-data";

/// Default MinIO access key for local development.
pub const DEFAULT_MINIO_ACCESS_KEY: &str = "minioadmin";

/// Default MinIO secret key for local development.
pub const DEFAULT_MINIO_SECRET_KEY: &str = "minioadmin";

/// Configuration for an S3-compatible object-storage client.
///
/// # Environment Variables
///
/// - `STORAGE_S3_ENDPOINT` / `S3_ENDPOINT`
/// - `STORAGE_S3_REGION` / `S3_REGION` (default: "us-east-1")
/// - `STORAGE_S3_BUCKET` / `S3_BUCKET` (default: "egress-data")
/// - `STORAGE_S3_ACCESS_KEY` / `S3_ACCESS_KEY` / `AWS_ACCESS_KEY_ID`
/// - `STORAGE_S3_SECRET_KEY` / `S3_SECRET_KEY` / `AWS_SECRET_ACCESS_KEY`
/// - `STORAGE_S3_PATH_STYLE` / `S3_PATH_STYLE`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
}

impl ObjectStorageConfig {
    /// Builds configuration from environment variables, falling back to
    /// MinIO-friendly defaults for local development.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            endpoint: env::var("STORAGE_S3_ENDPOINT")
                .or_else(|_| env::var("S3_ENDPOINT"))
                .ok(),
            region: env::var("STORAGE_S3_REGION")
                .or_else(|_| env::var("S3_REGION"))
                .unwrap_or_else(|_| DEFAULT_S3_REGION.to_string()),
            bucket: env::var("STORAGE_S3_BUCKET")
                .or_else(|_| env::var("S3_BUCKET"))
                .unwrap_or_else(|_| DEFAULT_S3_BUCKET.to_string()),
            access_key: env::var("STORAGE_S3_ACCESS_KEY")
                .or_else(|_| env::var("S3_ACCESS_KEY"))
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .unwrap_or_else(|_| DEFAULT_MINIO_ACCESS_KEY.to_string()),
            secret_key: env::var("STORAGE_S3_SECRET_KEY")
                .or_else(|_| env::var("S3_SECRET_KEY"))
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .unwrap_or_else(|_| DEFAULT_MINIO_SECRET_KEY.to_string()),
            path_style: env::var("STORAGE_S3_PATH_STYLE")
                .or_else(|_| env::var("S3_PATH_STYLE"))
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        })
    }

    /// Configuration for local MinIO development.
    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: DEFAULT_S3_REGION.to_string(),
            bucket: bucket.into(),
            access_key: DEFAULT_MINIO_ACCESS_KEY.to_string(),
            secret_key: DEFAULT_MINIO_SECRET_KEY.to_string(),
            path_style: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_minio() {
        let config = ObjectStorageConfig::for_minio("http://localhost:9000", "test-bucket");
        assert_eq!(config.endpoint, Some("http://localhost:9000".to_string()));
        assert_eq!(config.bucket, "test-bucket");
        assert!(config.path_style);
        assert_eq!(config.access_key, DEFAULT_MINIO_ACCESS_KEY);
    }
}
