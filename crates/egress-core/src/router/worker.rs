//! Batch worker pool (C5)
//!
//! Composes one batch of jobs into a single compressed object, journals the
//! upload before it starts, uploads it, and only then reports job status
//! back to the queue and drops the journal entry. A crash between upload
//! and journal delete leaves an orphan entry; `seed_dedup_cache` replays
//! those at startup so a restarted worker never re-delivers the same
//! `messageId` twice.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::{RouterConfig, WarehouseConfig};
use crate::error::{EgressError, EgressResult};
use crate::journal::{Journal, RawUploadPayload, OP_TYPE_RAW_UPLOAD};
use crate::storage::ObjectStorageDriver;
use crate::types::DestinationBinding;
use crate::warehouse::catalog::Catalog;
use crate::warehouse::types::{Schema, TableSchema};

use super::dedup_cache::DedupCache;
use super::job_queue::JobQueue;
use super::types::{Job, JobState, JobStatusUpdate};

pub struct Batch {
    pub binding: DestinationBinding,
    pub jobs: Vec<Job>,
}

pub struct BatchWorker {
    worker_id: Uuid,
    hostname: String,
    storage: Arc<dyn ObjectStorageDriver>,
    journal: Arc<Journal>,
    job_queue: Arc<dyn JobQueue>,
    dedup_cache: Arc<DedupCache>,
    catalog: Arc<Catalog>,
    router_config: RouterConfig,
    warehouse_config: WarehouseConfig,
}

impl BatchWorker {
    pub fn new(
        storage: Arc<dyn ObjectStorageDriver>,
        journal: Arc<Journal>,
        job_queue: Arc<dyn JobQueue>,
        dedup_cache: Arc<DedupCache>,
        catalog: Arc<Catalog>,
        router_config: RouterConfig,
        warehouse_config: WarehouseConfig,
    ) -> Self {
        Self {
            worker_id: Uuid::new_v4(),
            hostname: hostname::get().unwrap_or_else(|_| "unknown".into()).to_string_lossy().to_string(),
            storage,
            journal,
            job_queue,
            dedup_cache,
            catalog,
            router_config,
            warehouse_config,
        }
    }

    /// Replays journal entries orphaned by a crash into the dedup cache so
    /// jobs already uploaded once are never re-delivered after restart.
    ///
    /// An entry surviving in the journal only proves the upload was
    /// *attempted*, not that it landed — the journal is written before
    /// `storage.upload` runs. Trusting a precomputed id list from the entry
    /// itself would seed ids for objects that were never actually written,
    /// permanently (and silently) marking those jobs succeeded on restart.
    /// Instead this downloads the real object the entry points at and scans
    /// its contents; if the object isn't there, the upload never completed
    /// and there is nothing to seed for that entry.
    pub async fn seed_dedup_cache(&self) -> EgressResult<usize> {
        let entries = self.journal.list(OP_TYPE_RAW_UPLOAD).await?;
        let mut seeded = 0;
        for entry in &entries {
            let payload: RawUploadPayload = match serde_json::from_value(entry.payload.clone()) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(op_id = %entry.op_id, error = %e, "skipping malformed journal entry");
                    continue;
                },
            };

            let body = match self.storage.download(&payload.bucket, &payload.key).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(op_id = %entry.op_id, bucket = %payload.bucket, key = %payload.key, error = %e, "orphaned journal object not found, upload never completed");
                    continue;
                },
            };

            for id in message_ids_in_object(&body)? {
                self.dedup_cache.insert(&id);
                seeded += 1;
            }
        }
        if seeded > 0 {
            warn!(orphaned_entries = entries.len(), seeded, "seeded dedup cache from orphaned journal entries");
        }
        Ok(seeded)
    }

    #[instrument(skip(self, batch), fields(worker_id = %self.worker_id, hostname = %self.hostname))]
    pub async fn process(&self, batch: Batch) -> EgressResult<()> {
        let Batch { binding, jobs } = batch;

        let (to_upload, already_seen): (Vec<Job>, Vec<Job>) = jobs
            .into_iter()
            .partition(|job| job.message_id().map(|id| !self.dedup_cache.contains(id)).unwrap_or(true));

        let mut updates = Vec::new();
        updates.extend(already_seen.iter().map(|job| succeeded_update(job, "duplicate of orphaned upload")));

        if !to_upload.is_empty() {
            match self.upload_batch(&binding, &to_upload).await {
                Ok(()) => {
                    updates.extend(to_upload.iter().map(|job| succeeded_update(job, "uploaded")));
                },
                Err(e) => {
                    warn!(error = %e, source_id = %binding.source_id, destination_id = %binding.destination_id, "batch upload failed");
                    updates.extend(to_upload.iter().map(|job| failed_update(job, &e.to_string())));
                },
            }
        }

        self.job_queue
            .update_job_status(&updates, &[binding.destination_type], &binding.source_id)
            .await?;

        Ok(())
    }

    async fn upload_batch(&self, binding: &DestinationBinding, jobs: &[Job]) -> EgressResult<()> {
        let body = compose_ndjson(jobs);
        let gz_body = gzip(&body)?;

        let (bucket, folder) = self.destination_bucket(binding);
        let key = object_key(&folder, &binding.source_id);

        let journal_payload = serde_json::to_value(RawUploadPayload {
            provider: binding.destination_type.staging_provider().unwrap_or(binding.destination_type).as_str().to_string(),
            bucket: bucket.clone(),
            key: key.clone(),
        })?;

        let op_id = self.journal.mark_start(OP_TYPE_RAW_UPLOAD, &journal_payload).await?;

        let result = self
            .storage
            .upload(&bucket, &key, gz_body)
            .await
            .map_err(|e| EgressError::Storage(e.to_string()));

        let result = match result {
            Ok(r) => r,
            Err(e) => {
                // leave the journal entry; it will be replayed as an orphan only
                // if the upload actually reached the object store before the
                // crash, which it provably didn't here.
                self.journal.delete(op_id).await?;
                return Err(e);
            },
        };

        if binding.destination_type.is_warehouse() {
            let schema = schema_from_jobs(jobs);
            self.catalog
                .insert_staging_file(&binding.source_id, &binding.destination_id, &result.location(), &schema)
                .await?;
        }

        self.journal.delete(op_id).await?;

        for job in jobs {
            if let Some(id) = job.message_id() {
                self.dedup_cache.insert(id);
            }
        }

        info!(bucket = %result.bucket, key = %result.key, jobs = jobs.len(), "uploaded batch");
        Ok(())
    }

    fn destination_bucket(&self, binding: &DestinationBinding) -> (String, String) {
        if binding.destination_type.is_warehouse() {
            (self.warehouse_config.staging_bucket.clone(), self.warehouse_config.bucket_folder_name.clone())
        } else {
            let bucket = binding.raw_bucket().map(|b| b.to_string()).unwrap_or_else(|| {
                format!("egress-{}", binding.destination_type.as_str().to_lowercase())
            });
            (bucket, self.router_config.destination_bucket_folder_name.clone())
        }
    }
}

fn succeeded_update(job: &Job, message: &str) -> JobStatusUpdate {
    JobStatusUpdate {
        job_id: job.job_id,
        state: JobState::Succeeded,
        attempt_num: job.attempt_num + 1,
        response: serde_json::json!({"message": message}),
    }
}

fn failed_update(job: &Job, error: &str) -> JobStatusUpdate {
    JobStatusUpdate {
        job_id: job.job_id,
        state: JobState::Failed,
        attempt_num: job.attempt_num + 1,
        response: serde_json::json!({"error": error}),
    }
}

fn compose_ndjson(jobs: &[Job]) -> Vec<u8> {
    let mut out = Vec::new();
    for job in jobs {
        if let Ok(line) = serde_json::to_vec(&job.payload) {
            out.extend_from_slice(&line);
            out.push(b'\n');
        }
    }
    out
}

fn schema_from_jobs(jobs: &[Job]) -> Schema {
    let mut schema: Schema = BTreeMap::new();
    for job in jobs {
        let (Some(table), Some(columns)) = (job.table(), job.columns()) else {
            continue;
        };
        let entry: &mut TableSchema = schema.entry(table.to_string()).or_default();
        for (name, dtype) in columns {
            if let Some(dtype) = dtype.as_str() {
                entry.entry(name.clone()).or_insert_with(|| dtype.to_string());
            }
        }
    }
    schema
}

fn gzip(data: &[u8]) -> EgressResult<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Scans a gzip-compressed, newline-delimited batch object (the shape
/// `upload_batch` writes) for each record's `messageId`.
fn message_ids_in_object(gz_data: &[u8]) -> EgressResult<Vec<String>> {
    use flate2::read::GzDecoder;
    use std::io::Read;

    let mut decoder = GzDecoder::new(gz_data);
    let mut decompressed = String::new();
    decoder.read_to_string(&mut decompressed)?;

    Ok(decompressed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .filter_map(|value| value.get("messageId").and_then(|id| id.as_str()).map(|s| s.to_string()))
        .collect())
}

/// `{folder}/{source_id}/{MM-DD-YYYY}/{filename}`, per the key convention
/// documented on `ObjectStorageDriver`.
fn object_key(folder: &str, source_id: &str) -> String {
    let date = Utc::now().format("%m-%d-%Y");
    format!("{}/{}/{}/{}.json.gz", folder, source_id, date, Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DestinationType;

    fn job(payload: serde_json::Value) -> Job {
        Job {
            job_id: Uuid::new_v4(),
            source_id: "src1".to_string(),
            destination_id: "dest1".to_string(),
            destination_type: DestinationType::Rs,
            payload,
            attempt_num: 0,
            state: JobState::Waiting,
        }
    }

    #[test]
    fn test_compose_ndjson_writes_one_line_per_job() {
        let jobs = vec![job(serde_json::json!({"a": 1})), job(serde_json::json!({"a": 2}))];
        let body = compose_ndjson(&jobs);
        let text = String::from_utf8(body).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn test_object_key_has_expected_shape() {
        let key = object_key("rudder-logs", "src1");
        assert!(key.starts_with("rudder-logs/src1/"));
        assert!(key.ends_with(".json.gz"));
    }

    #[test]
    fn test_schema_from_jobs_unions_tables() {
        let jobs = vec![
            job(serde_json::json!({"metadata": {"table": "users", "columns": {"id": "int"}}, "data": {}})),
            job(serde_json::json!({"metadata": {"table": "users", "columns": {"email": "string"}}, "data": {}})),
        ];
        let schema = schema_from_jobs(&jobs);
        assert_eq!(schema["users"].len(), 2);
    }

    #[test]
    fn test_schema_from_jobs_skips_jobs_without_metadata() {
        let jobs = vec![job(serde_json::json!({"data": {}}))];
        let schema = schema_from_jobs(&jobs);
        assert!(schema.is_empty());
    }

    #[test]
    fn test_message_ids_in_object_scans_real_uploaded_bytes() {
        let jobs = vec![
            job(serde_json::json!({"messageId": "msg-1", "data": {}})),
            job(serde_json::json!({"messageId": "msg-2", "data": {}})),
            job(serde_json::json!({"data": {}})),
        ];
        let gz_body = gzip(&compose_ndjson(&jobs)).unwrap();
        let ids = message_ids_in_object(&gz_body).unwrap();
        assert_eq!(ids, vec!["msg-1".to_string(), "msg-2".to_string()]);
    }
}
