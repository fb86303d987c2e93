//! Configuration management
//!
//! Environment-driven configuration for the batch router, the warehouse
//! uploader, the database pool, and the object-storage client. Each
//! sub-config exposes `from_env()` with sensible defaults and a
//! `validate()` pass, mirroring the convention used throughout this
//! workspace.

use serde::{Deserialize, Serialize};
use std::env;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/egress";
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

pub const DEFAULT_JOB_QUERY_BATCH_SIZE: i64 = 100_000;
pub const DEFAULT_ROUTER_WORKER_COUNT: usize = 8;
pub const DEFAULT_ROUTER_MAIN_LOOP_SLEEP_SECS: u64 = 5;

pub const DEFAULT_WAREHOUSE_WORKER_COUNT: usize = 8;
pub const DEFAULT_WAREHOUSE_UPLOAD_SLEEP_SECS: u64 = 1800;
pub const DEFAULT_WAREHOUSE_MAIN_LOOP_SLEEP_SECS: u64 = 5;
pub const DEFAULT_WAREHOUSE_STAGING_FILE_PAGE_SIZE: i64 = 20;
pub const DEFAULT_WAREHOUSE_STALE_UPLOAD_AGE_SECS: i64 = 3600;

pub const DEFAULT_WAREHOUSE_BUCKET: &str = "rudder-warehouse-staging";
pub const DEFAULT_WAREHOUSE_BUCKET_FOLDER_NAME: &str = "rudder-warehouse-staging-logs";
pub const DEFAULT_DESTINATION_BUCKET_FOLDER_NAME: &str = "rudder-logs";
pub const DEFAULT_WAREHOUSE_LOAD_OBJECTS_FOLDER_NAME: &str = "rudder-warehouse-load-objects";
pub const DEFAULT_WAREHOUSE_JSON_UPLOADS_BUCKET: &str = "rudder-warehouse-json-uploads";
pub const DEFAULT_WAREHOUSE_MANIFEST_BUCKET: &str = "rudder-warehouse-manifests";
pub const DEFAULT_WAREHOUSE_DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_DEDUP_CACHE_CAPACITY: usize = 1_000_000;

/// Top-level process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub router: RouterConfig,
    pub warehouse: WarehouseConfig,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            database: DatabaseConfig::from_env()?,
            router: RouterConfig::from_env()?,
            warehouse: WarehouseConfig::from_env()?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.database.validate()?;
        self.router.validate()?;
        self.warehouse.validate()?;
        Ok(())
    }
}

/// Database connection pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            url: env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
            min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DATABASE_MIN_CONNECTIONS),
            connect_timeout_secs: env::var("DATABASE_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
            idle_timeout_secs: env::var("DATABASE_IDLE_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            anyhow::bail!("DATABASE_URL cannot be empty");
        }
        if self.max_connections == 0 {
            anyhow::bail!("DATABASE_MAX_CONNECTIONS must be greater than 0");
        }
        if self.min_connections > self.max_connections {
            anyhow::bail!(
                "DATABASE_MIN_CONNECTIONS ({}) cannot be greater than DATABASE_MAX_CONNECTIONS ({})",
                self.min_connections,
                self.max_connections
            );
        }
        Ok(())
    }
}

/// Batch Router (C4/C5) configuration — see `BatchRouter.*` keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub job_query_batch_size: i64,
    pub worker_count: usize,
    pub main_loop_sleep_secs: u64,
    pub destination_bucket_folder_name: String,
    pub dedup_cache_capacity: usize,
}

impl RouterConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            job_query_batch_size: env::var("BATCH_ROUTER_JOB_QUERY_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_JOB_QUERY_BATCH_SIZE),
            worker_count: env::var("BATCH_ROUTER_WORKER_COUNT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_ROUTER_WORKER_COUNT),
            main_loop_sleep_secs: env::var("BATCH_ROUTER_MAIN_LOOP_SLEEP_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_ROUTER_MAIN_LOOP_SLEEP_SECS),
            destination_bucket_folder_name: env::var("DESTINATION_BUCKET_FOLDER_NAME")
                .unwrap_or_else(|_| DEFAULT_DESTINATION_BUCKET_FOLDER_NAME.to_string()),
            dedup_cache_capacity: env::var("ROUTER_DEDUP_CACHE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DEDUP_CACHE_CAPACITY),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.job_query_batch_size <= 0 {
            anyhow::bail!("BATCH_ROUTER_JOB_QUERY_BATCH_SIZE must be greater than 0");
        }
        if self.worker_count == 0 {
            anyhow::bail!("BATCH_ROUTER_WORKER_COUNT must be greater than 0");
        }
        Ok(())
    }
}

/// Warehouse Uploader (C6-C9) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub worker_count: usize,
    pub upload_sleep_secs: u64,
    pub main_loop_sleep_secs: u64,
    pub staging_file_page_size: i64,
    pub stale_upload_age_secs: i64,
    pub staging_bucket: String,
    pub bucket_folder_name: String,
    pub load_objects_folder_name: String,
    pub json_uploads_bucket: String,
    pub manifest_bucket: String,
    pub default_region: String,
}

impl WarehouseConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            worker_count: env::var("WAREHOUSE_WORKER_COUNT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_WAREHOUSE_WORKER_COUNT),
            upload_sleep_secs: env::var("WAREHOUSE_UPLOAD_SLEEP_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_WAREHOUSE_UPLOAD_SLEEP_SECS),
            main_loop_sleep_secs: env::var("WAREHOUSE_MAIN_LOOP_SLEEP_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_WAREHOUSE_MAIN_LOOP_SLEEP_SECS),
            staging_file_page_size: env::var("WAREHOUSE_STAGING_FILE_PAGE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_WAREHOUSE_STAGING_FILE_PAGE_SIZE),
            stale_upload_age_secs: env::var("WAREHOUSE_STALE_UPLOAD_AGE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_WAREHOUSE_STALE_UPLOAD_AGE_SECS),
            staging_bucket: env::var("WAREHOUSE_STAGING_BUCKET")
                .unwrap_or_else(|_| DEFAULT_WAREHOUSE_BUCKET.to_string()),
            bucket_folder_name: env::var("WAREHOUSE_BUCKET_FOLDER_NAME")
                .unwrap_or_else(|_| DEFAULT_WAREHOUSE_BUCKET_FOLDER_NAME.to_string()),
            load_objects_folder_name: env::var("WAREHOUSE_BUCKET_LOAD_OBJECTS_FOLDER_NAME")
                .unwrap_or_else(|_| DEFAULT_WAREHOUSE_LOAD_OBJECTS_FOLDER_NAME.to_string()),
            json_uploads_bucket: env::var("WAREHOUSE_JSON_UPLOADS_BUCKET")
                .unwrap_or_else(|_| DEFAULT_WAREHOUSE_JSON_UPLOADS_BUCKET.to_string()),
            manifest_bucket: env::var("WAREHOUSE_MANIFEST_BUCKET")
                .unwrap_or_else(|_| DEFAULT_WAREHOUSE_MANIFEST_BUCKET.to_string()),
            default_region: env::var("WAREHOUSE_DEFAULT_REGION")
                .unwrap_or_else(|_| DEFAULT_WAREHOUSE_DEFAULT_REGION.to_string()),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_count == 0 {
            anyhow::bail!("WAREHOUSE_WORKER_COUNT must be greater than 0");
        }
        if self.staging_file_page_size <= 0 {
            anyhow::bail!("WAREHOUSE_STAGING_FILE_PAGE_SIZE must be greater than 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_router_config_defaults() {
        env::remove_var("BATCH_ROUTER_JOB_QUERY_BATCH_SIZE");
        env::remove_var("BATCH_ROUTER_WORKER_COUNT");
        let config = RouterConfig::from_env().unwrap();
        assert_eq!(config.job_query_batch_size, DEFAULT_JOB_QUERY_BATCH_SIZE);
        assert_eq!(config.worker_count, DEFAULT_ROUTER_WORKER_COUNT);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_router_config_rejects_zero_workers() {
        env::set_var("BATCH_ROUTER_WORKER_COUNT", "0");
        let config = RouterConfig::from_env().unwrap();
        assert!(config.validate().is_err());
        env::remove_var("BATCH_ROUTER_WORKER_COUNT");
    }

    #[test]
    #[serial]
    fn test_database_config_rejects_inverted_pool_bounds() {
        env::set_var("DATABASE_MIN_CONNECTIONS", "20");
        env::set_var("DATABASE_MAX_CONNECTIONS", "5");
        let config = DatabaseConfig::from_env().unwrap();
        assert!(config.validate().is_err());
        env::remove_var("DATABASE_MIN_CONNECTIONS");
        env::remove_var("DATABASE_MAX_CONNECTIONS");
    }

    #[test]
    fn test_warehouse_config_defaults() {
        let config = WarehouseConfig::from_env().unwrap();
        assert_eq!(config.default_region, "us-east-1");
        assert!(config.validate().is_ok());
    }
}
