//! Batch Router main loop (C4)
//!
//! One scheduling pass per enabled destination binding: claim the binding
//! (so at most one batch is in flight for it at a time), pull a bounded
//! page of jobs across the retry/waiting/unprocessed classes, mark them
//! `executing`, and hand the batch to the worker pool over a channel. The
//! worker pool (C5) does the actual upload and reports status back.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, warn};

use crate::config::RouterConfig;
use crate::config_subscriber::ConfigSubscriber;
use crate::error::EgressResult;
use crate::registry::InProgressRegistry;
use crate::types::DestinationBinding;

use super::job_queue::JobQueue;
use super::types::{Job, JobState, JobStatusUpdate};
use super::worker::{Batch, BatchWorker};

pub struct BatchRouter {
    job_queue: Arc<dyn JobQueue>,
    registry: Arc<InProgressRegistry>,
    config_subscriber: Arc<ConfigSubscriber>,
    config: RouterConfig,
    batch_tx: mpsc::Sender<Batch>,
}

impl BatchRouter {
    /// Spawns `config.worker_count` workers and returns a router that feeds
    /// them. The caller is responsible for awaiting `run()`.
    pub fn spawn(
        job_queue: Arc<dyn JobQueue>,
        registry: Arc<InProgressRegistry>,
        config_subscriber: Arc<ConfigSubscriber>,
        config: RouterConfig,
        worker: Arc<BatchWorker>,
    ) -> Self {
        let (batch_tx, batch_rx) = mpsc::channel::<Batch>(config.worker_count * 2);
        spawn_worker_pool(worker, registry.clone(), batch_rx, config.worker_count);

        Self {
            job_queue,
            registry,
            config_subscriber,
            config,
            batch_tx,
        }
    }

    pub async fn run(&self) {
        loop {
            let bindings = self.config_subscriber.snapshot();
            for binding in bindings.iter() {
                if let Err(e) = self.schedule_binding(binding).await {
                    error!(source_id = %binding.source_id, destination_id = %binding.destination_id, error = %e, "failed to schedule binding");
                }
            }
            tokio::time::sleep(Duration::from_secs(self.config.main_loop_sleep_secs)).await;
        }
    }

    async fn schedule_binding(&self, binding: &DestinationBinding) -> EgressResult<()> {
        if !self.registry.try_mark(&binding.in_progress_key()) {
            debug!(source_id = %binding.source_id, destination_id = %binding.destination_id, "binding already in progress, skipping");
            return Ok(());
        }

        let jobs = self.collect_jobs(binding).await?;

        if jobs.is_empty() {
            self.registry.clear(&binding.in_progress_key());
            return Ok(());
        }

        self.mark_executing(binding, &jobs).await?;

        let job_count = jobs.len();
        let batch = Batch {
            binding: binding.clone(),
            jobs,
        };

        if self.batch_tx.send(batch).await.is_err() {
            warn!("batch worker pool channel closed, dropping batch");
            self.registry.clear(&binding.in_progress_key());
        } else {
            debug!(source_id = %binding.source_id, destination_id = %binding.destination_id, job_count, "dispatched batch");
        }

        Ok(())
    }

    async fn collect_jobs(&self, binding: &DestinationBinding) -> EgressResult<Vec<Job>> {
        let types = [binding.destination_type];
        let mut budget = self.config.job_query_batch_size;
        let mut jobs = Vec::new();

        let to_retry = self.job_queue.get_to_retry(&types, budget, &binding.source_id).await?;
        budget -= to_retry.len() as i64;
        jobs.extend(to_retry);

        if budget > 0 {
            let waiting = self.job_queue.get_waiting(&types, budget, &binding.source_id).await?;
            budget -= waiting.len() as i64;
            jobs.extend(waiting);
        }

        if budget > 0 {
            let unprocessed = self.job_queue.get_unprocessed(&types, budget, &binding.source_id).await?;
            jobs.extend(unprocessed);
        }

        Ok(jobs)
    }

    async fn mark_executing(&self, binding: &DestinationBinding, jobs: &[Job]) -> EgressResult<()> {
        let updates: Vec<JobStatusUpdate> = jobs
            .iter()
            .map(|job| JobStatusUpdate {
                job_id: job.job_id,
                state: JobState::Executing,
                attempt_num: job.attempt_num,
                response: serde_json::Value::Null,
            })
            .collect();

        self.job_queue
            .update_job_status(&updates, &[binding.destination_type], &binding.source_id)
            .await
    }
}

/// Drains the batch channel and runs at most `worker_count` uploads
/// concurrently, clearing the binding's in-progress mark once its batch
/// resolves either way.
fn spawn_worker_pool(
    worker: Arc<BatchWorker>,
    registry: Arc<InProgressRegistry>,
    mut batch_rx: mpsc::Receiver<Batch>,
    worker_count: usize,
) {
    let permits = Arc::new(Semaphore::new(worker_count));

    tokio::spawn(async move {
        while let Some(batch) = batch_rx.recv().await {
            let key = batch.binding.in_progress_key();
            let worker = worker.clone();
            let registry = registry.clone();
            let permits = permits.clone();

            tokio::spawn(async move {
                let Ok(_permit) = permits.acquire().await else {
                    registry.clear(&key);
                    return;
                };
                if let Err(e) = worker.process(batch).await {
                    error!(error = %e, "batch worker failed");
                }
                registry.clear(&key);
            });
        }
    });
}
