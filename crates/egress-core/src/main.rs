//! Egress Core - Main entry point

use anyhow::Result;
use egress_common::logging::{init_logging, LogConfig};
use sqlx::postgres::PgPoolOptions;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

use egress_core::config::Config;
use egress_core::config_subscriber::ConfigSubscriber;
use egress_core::journal::Journal;
use egress_core::registry::InProgressRegistry;
use egress_core::router::job_queue::{JobQueue, PgJobQueue};
use egress_core::router::{BatchRouter, BatchWorker};
use egress_core::storage::{config::ObjectStorageConfig, S3Storage};
use egress_core::types::DestinationType;
use egress_core::warehouse::catalog::Catalog;
use egress_core::warehouse::driver::bigquery::BigQueryDriver;
use egress_core::warehouse::driver::redshift::RedshiftDriver;
use egress_core::warehouse::driver::WarehouseDriver;
use egress_core::warehouse::load_file_builder::LoadFileBuilder;
use egress_core::warehouse::WarehouseUploader;

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::builder()
        .log_file_prefix("egress-core".to_string())
        .filter_directives("egress_core=debug,egress_common=debug,sqlx=info".to_string())
        .build();
    let log_config = LogConfig::from_env().unwrap_or(log_config);
    init_logging(&log_config)?;

    info!("starting egress core");

    let config = Config::load()?;
    info!(
        worker_count = config.router.worker_count,
        warehouse_worker_count = config.warehouse.worker_count,
        "configuration loaded"
    );

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_secs))
        .connect(&config.database.url)
        .await?;
    info!("database connection pool established");

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("failed to run migrations: {}", e))?;
    info!("database migrations completed");

    let storage_config = ObjectStorageConfig::from_env()?;
    let storage = Arc::new(S3Storage::new(&storage_config).await?);
    info!("object storage client initialized");

    let journal = Arc::new(Journal::new(db_pool.clone()));
    let registry = Arc::new(InProgressRegistry::new());
    let config_subscriber = Arc::new(ConfigSubscriber::default());
    let job_queue = Arc::new(PgJobQueue::new(db_pool.clone()));
    let catalog = Arc::new(Catalog::new(db_pool.clone()));

    let reset_count = job_queue.reset_orphaned_executing().await?;
    if reset_count > 0 {
        info!(reset_count, "reset orphaned executing jobs back to failed on startup");
    }

    let dedup_cache = Arc::new(egress_core::router::dedup_cache::DedupCache::new(
        config.router.dedup_cache_capacity,
    ));

    let worker = Arc::new(BatchWorker::new(
        storage.clone(),
        journal.clone(),
        job_queue.clone(),
        dedup_cache.clone(),
        catalog.clone(),
        config.router.clone(),
        config.warehouse.clone(),
    ));
    worker.seed_dedup_cache().await?;

    let router = BatchRouter::spawn(
        job_queue.clone(),
        registry.clone(),
        config_subscriber.clone(),
        config.router.clone(),
        worker.clone(),
    );

    let load_file_builder = Arc::new(LoadFileBuilder::new(
        storage.clone(),
        catalog.clone(),
        config.warehouse.staging_bucket.clone(),
        config.warehouse.load_objects_folder_name.clone(),
    ));

    let mut drivers: HashMap<DestinationType, Arc<dyn WarehouseDriver>> = HashMap::new();
    if let Ok(redshift_url) = std::env::var("REDSHIFT_DATABASE_URL") {
        let redshift_pool = PgPoolOptions::new().max_connections(5).connect(&redshift_url).await?;
        let iam_role_arn = std::env::var("REDSHIFT_IAM_ROLE_ARN").unwrap_or_default();
        drivers.insert(
            DestinationType::Rs,
            Arc::new(RedshiftDriver::new(
                redshift_pool,
                storage.clone(),
                iam_role_arn,
                config.warehouse.manifest_bucket.clone(),
                config.warehouse.default_region.clone(),
            )),
        );
        info!("redshift warehouse driver configured");
    }
    if let Ok(project_id) = std::env::var("BIGQUERY_PROJECT_ID") {
        let access_token = std::env::var("BIGQUERY_ACCESS_TOKEN").unwrap_or_default();
        drivers.insert(DestinationType::Bq, Arc::new(BigQueryDriver::new(project_id, access_token)));
        info!("bigquery warehouse driver configured");
    }

    let warehouse_registry = Arc::new(InProgressRegistry::new());
    let warehouse_uploader = Arc::new(WarehouseUploader::spawn(
        catalog.clone(),
        load_file_builder.clone(),
        drivers,
        warehouse_registry,
        config_subscriber.clone(),
        config.warehouse.clone(),
    ));

    let router_handle = tokio::spawn(async move { router.run().await });
    let warehouse_handle = tokio::spawn(async move { warehouse_uploader.run().await });

    tokio::select! {
        _ = shutdown_signal() => {
            info!("shutdown signal received, stopping");
        },
        _ = router_handle => {
            info!("batch router loop exited unexpectedly");
        },
        _ = warehouse_handle => {
            info!("warehouse uploader loop exited unexpectedly");
        },
    }

    info!("egress core shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
