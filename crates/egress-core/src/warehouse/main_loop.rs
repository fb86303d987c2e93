//! Warehouse main loop (C6)
//!
//! One pass per warehouse-bound destination binding: resume an in-progress
//! upload if one exists, otherwise page in the next contiguous run of
//! pending staging files and start a new one. There is no separate
//! stale-upload abort path — an upload that has been sitting unresolved
//! simply gets resumed from whatever stage its status says it reached,
//! every pass, until it completes or an operator intervenes.
//!
//! Scheduling and execution are split the same way the Batch Router splits
//! them: the main loop only claims bindings and hands them to a bounded
//! pool of workers over a channel, so at most `worker_count` uploads ever
//! run concurrently regardless of how many bindings are configured.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::WarehouseConfig;
use crate::config_subscriber::ConfigSubscriber;
use crate::error::EgressResult;
use crate::registry::InProgressRegistry;
use crate::types::{DestinationBinding, DestinationType};

use super::catalog::Catalog;
use super::driver::WarehouseDriver;
use super::load_file_builder::LoadFileBuilder;
use super::schema::{consolidate, diff_new_columns};
use super::types::{ResumeStage, Schema, StagingFileStatus, UploadRecord, UploadState};

pub struct WarehouseUploader {
    registry: Arc<InProgressRegistry>,
    config_subscriber: Arc<ConfigSubscriber>,
    config: WarehouseConfig,
    binding_tx: mpsc::Sender<DestinationBinding>,
}

/// Does the actual upload work for one binding; shared read-only across
/// every pool worker.
struct Worker {
    catalog: Arc<Catalog>,
    load_file_builder: Arc<LoadFileBuilder>,
    drivers: HashMap<DestinationType, Arc<dyn WarehouseDriver>>,
    config: WarehouseConfig,
}

impl WarehouseUploader {
    /// Spawns `config.worker_count` workers and returns an uploader that
    /// feeds them. The caller is responsible for awaiting `run()`.
    pub fn spawn(
        catalog: Arc<Catalog>,
        load_file_builder: Arc<LoadFileBuilder>,
        drivers: HashMap<DestinationType, Arc<dyn WarehouseDriver>>,
        registry: Arc<InProgressRegistry>,
        config_subscriber: Arc<ConfigSubscriber>,
        config: WarehouseConfig,
    ) -> Self {
        let worker = Arc::new(Worker {
            catalog,
            load_file_builder,
            drivers,
            config: config.clone(),
        });

        let (binding_tx, binding_rx) = mpsc::channel::<DestinationBinding>(config.worker_count * 2);
        spawn_worker_pool(worker, registry.clone(), binding_rx, config.worker_count);

        Self {
            registry,
            config_subscriber,
            config,
            binding_tx,
        }
    }

    pub async fn run(&self) {
        loop {
            let bindings = self.config_subscriber.snapshot();
            for binding in bindings.iter().filter(|b| b.destination_type.is_warehouse()) {
                if !self.registry.try_mark(&binding.in_progress_key()) {
                    debug!(source_id = %binding.source_id, destination_id = %binding.destination_id, "warehouse binding already in progress, skipping");
                    continue;
                }

                if self.binding_tx.send(binding.clone()).await.is_err() {
                    warn!("warehouse worker pool channel closed, dropping binding");
                    self.registry.clear(&binding.in_progress_key());
                }
            }
            tokio::time::sleep(Duration::from_secs(self.config.main_loop_sleep_secs)).await;
        }
    }
}

/// Drains the binding channel and runs at most `worker_count` uploads
/// concurrently, clearing the binding's in-progress mark once its pass
/// resolves either way.
fn spawn_worker_pool(
    worker: Arc<Worker>,
    registry: Arc<InProgressRegistry>,
    mut binding_rx: mpsc::Receiver<DestinationBinding>,
    worker_count: usize,
) {
    let permits = Arc::new(Semaphore::new(worker_count));

    tokio::spawn(async move {
        while let Some(binding) = binding_rx.recv().await {
            let key = binding.in_progress_key();
            let worker = worker.clone();
            let registry = registry.clone();
            let permits = permits.clone();

            tokio::spawn(async move {
                let Ok(_permit) = permits.acquire().await else {
                    registry.clear(&key);
                    return;
                };
                if let Err(e) = worker.process_binding(&binding).await {
                    error!(source_id = %binding.source_id, destination_id = %binding.destination_id, error = %e, "warehouse pass failed");
                }
                registry.clear(&key);
            });
        }
    });
}

impl Worker {
    async fn process_binding(&self, binding: &DestinationBinding) -> EgressResult<()> {
        let existing = self
            .catalog
            .in_progress_upload(&binding.source_id, &binding.destination_id)
            .await?;

        let upload = match existing {
            Some(upload) => {
                let age_secs = upload.age().num_seconds();
                if age_secs > self.config.stale_upload_age_secs {
                    warn!(upload_id = upload.id, stage = ?upload.status, age_secs, "in-progress upload exceeds stale age, resuming anyway");
                } else {
                    info!(upload_id = upload.id, stage = ?upload.status, age_secs, "resuming in-progress upload");
                }
                upload
            },
            None => match self.start_new_upload(binding).await? {
                Some(upload) => upload,
                None => return Ok(()),
            },
        };

        self.advance(binding, upload).await
    }

    async fn start_new_upload(&self, binding: &DestinationBinding) -> EgressResult<Option<UploadRecord>> {
        let page = self
            .catalog
            .pending_staging_files(&binding.source_id, &binding.destination_id, self.config.staging_file_page_size)
            .await?;

        if page.is_empty() {
            return Ok(None);
        }

        let start_id = page[0].id;
        let end_id = page[page.len() - 1].id;
        let current_schema = self.catalog.current_schema(&binding.source_id, &binding.destination_id).await?;
        let schema: Schema = consolidate(current_schema.as_ref(), &page);

        let upload_id = self
            .catalog
            .create_upload(
                &binding.source_id,
                &binding.destination_id,
                binding.destination_type,
                &binding.namespace(),
                start_id,
                end_id,
                &schema,
            )
            .await?;

        info!(upload_id, staging_files = page.len(), "started new upload");

        Ok(self.catalog.in_progress_upload(&binding.source_id, &binding.destination_id).await?)
    }

    async fn advance(&self, binding: &DestinationBinding, mut upload: UploadRecord) -> EgressResult<()> {
        loop {
            let stage = upload.status.resume_stage();
            let result = match stage {
                ResumeStage::GenerateLoadFiles => self.generate_load_files(binding, &upload).await,
                ResumeStage::UpdateSchema => self.update_schema(binding, &upload).await,
                ResumeStage::ExportData => self.export_data(binding, &upload).await,
            };

            if let Err(e) = result {
                let failed_state = upload.status.failed_variant();
                warn!(upload_id = upload.id, stage = ?stage, error = %e, "upload stage failed");
                self.catalog
                    .set_upload_status(upload.id, failed_state, Some(&serde_json::json!({"error": e.to_string()})))
                    .await?;
                return Err(e);
            }

            match self
                .catalog
                .in_progress_upload(&binding.source_id, &binding.destination_id)
                .await?
            {
                Some(refreshed) if refreshed.id == upload.id => {
                    if refreshed.status == upload.status {
                        return Ok(());
                    }
                    upload = refreshed;
                },
                _ => return Ok(()),
            }
        }
    }

    async fn generate_load_files(&self, binding: &DestinationBinding, upload: &UploadRecord) -> EgressResult<()> {
        let staging_files = self
            .catalog
            .pending_staging_files(&binding.source_id, &binding.destination_id, self.config.staging_file_page_size)
            .await?
            .into_iter()
            .filter(|f| f.id >= upload.start_staging_file_id && f.id <= upload.end_staging_file_id)
            .collect::<Vec<_>>();

        let mut all_ids = Vec::new();
        for staging_file in &staging_files {
            match self
                .load_file_builder
                .build_for_staging_file(staging_file, &upload.schema, binding.destination_type)
                .await
            {
                Ok(ids) => all_ids.extend(ids),
                Err(e) => {
                    self.catalog
                        .mark_staging_file_status(staging_file.id, StagingFileStatus::Failed, Some(&e.to_string()))
                        .await?;
                    return Err(e);
                },
            }
        }

        if let (Some(&min), Some(&max)) = (all_ids.iter().min(), all_ids.iter().max()) {
            self.catalog.set_upload_load_file_range(upload.id, min, max).await?;
        }

        for staging_file in &staging_files {
            self.catalog.mark_staging_file_status(staging_file.id, StagingFileStatus::Succeeded, None).await?;
        }

        self.catalog
            .set_upload_status(upload.id, UploadState::GeneratedLoadFile, None)
            .await?;
        Ok(())
    }

    async fn update_schema(&self, binding: &DestinationBinding, upload: &UploadRecord) -> EgressResult<()> {
        self.catalog
            .set_upload_status(upload.id, UploadState::UpdatingSchema, None)
            .await?;

        let current = self.catalog.current_schema(&binding.source_id, &binding.destination_id).await?;
        let new_columns = diff_new_columns(current.as_ref(), &upload.schema);

        if !new_columns.is_empty() {
            let driver = self.driver_for(binding.destination_type)?;
            driver.migrate_schema(upload, &new_columns).await?;
        }

        self.catalog
            .upsert_current_schema(&binding.source_id, &binding.destination_id, &upload.schema)
            .await?;
        self.catalog
            .set_upload_status(upload.id, UploadState::UpdatedSchema, None)
            .await?;
        Ok(())
    }

    async fn export_data(&self, binding: &DestinationBinding, upload: &UploadRecord) -> EgressResult<()> {
        self.catalog
            .set_upload_status(upload.id, UploadState::ExportingData, None)
            .await?;

        let load_files = self.catalog.load_files_for_upload(upload).await?;
        let driver = self.driver_for(binding.destination_type)?;
        driver.export(upload, &load_files).await?;

        self.catalog
            .set_upload_status(upload.id, UploadState::ExportedData, None)
            .await?;
        Ok(())
    }

    fn driver_for(&self, destination_type: DestinationType) -> EgressResult<Arc<dyn WarehouseDriver>> {
        self.drivers
            .get(&destination_type)
            .cloned()
            .ok_or_else(|| crate::error::EgressError::invariant(format!("no warehouse driver configured for {destination_type}")))
    }
}
