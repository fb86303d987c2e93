//! Batch Router: schedules per-binding job batches (C4) and uploads them
//! through a bounded worker pool (C5).

pub mod dedup_cache;
pub mod job_queue;
pub mod main_loop;
pub mod types;
pub mod worker;

pub use main_loop::BatchRouter;
pub use worker::BatchWorker;
