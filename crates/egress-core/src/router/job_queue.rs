//! Job queue (§6 external interface)
//!
//! The job queue is nominally an external collaborator, but the pipeline
//! needs a concrete, runnable implementation to link. `PgJobQueue` is the
//! reference adapter: a direct-`sqlx` Postgres store using the same
//! atomic-claim-by-transaction style as the rest of this workspace's
//! worker/coordinator code.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::EgressResult;
use crate::types::DestinationType;

use super::types::{Job, JobState, JobStatusUpdate};

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Jobs that previously failed and are eligible for another attempt.
    async fn get_to_retry(
        &self,
        destination_types: &[DestinationType],
        limit: i64,
        source_id: &str,
    ) -> EgressResult<Vec<Job>>;

    /// Jobs waiting on a prior attempt's dependent step (attempted before,
    /// never resolved).
    async fn get_waiting(
        &self,
        destination_types: &[DestinationType],
        limit: i64,
        source_id: &str,
    ) -> EgressResult<Vec<Job>>;

    /// Jobs that have never been attempted.
    async fn get_unprocessed(
        &self,
        destination_types: &[DestinationType],
        limit: i64,
        source_id: &str,
    ) -> EgressResult<Vec<Job>>;

    /// Jobs currently marked `executing` — used at startup to reset jobs
    /// orphaned by a crash back to `failed`.
    async fn get_executing(
        &self,
        destination_types: &[DestinationType],
        limit: i64,
    ) -> EgressResult<Vec<Job>>;

    /// Writes terminal or transitional status for a batch of jobs.
    async fn update_job_status(
        &self,
        updates: &[JobStatusUpdate],
        destination_types: &[DestinationType],
        source_id: &str,
    ) -> EgressResult<()>;

    /// Startup crash recovery: every job still marked `executing` was
    /// orphaned by a restart mid-batch, since a batch only ever reports a
    /// terminal state after its upload resolves. Returns the number of jobs
    /// reset.
    async fn reset_orphaned_executing(&self) -> EgressResult<u64>;
}

pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn type_strings(destination_types: &[DestinationType]) -> Vec<String> {
        destination_types.iter().map(|t| t.as_str().to_string()).collect()
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn get_to_retry(
        &self,
        destination_types: &[DestinationType],
        limit: i64,
        source_id: &str,
    ) -> EgressResult<Vec<Job>> {
        fetch_jobs(&self.pool, destination_types, source_id, "failed", None, limit).await
    }

    async fn get_waiting(
        &self,
        destination_types: &[DestinationType],
        limit: i64,
        source_id: &str,
    ) -> EgressResult<Vec<Job>> {
        fetch_jobs(&self.pool, destination_types, source_id, "waiting", Some(true), limit).await
    }

    async fn get_unprocessed(
        &self,
        destination_types: &[DestinationType],
        limit: i64,
        source_id: &str,
    ) -> EgressResult<Vec<Job>> {
        fetch_jobs(&self.pool, destination_types, source_id, "waiting", Some(false), limit).await
    }

    async fn get_executing(
        &self,
        destination_types: &[DestinationType],
        limit: i64,
    ) -> EgressResult<Vec<Job>> {
        let types = Self::type_strings(destination_types);
        let rows = sqlx::query!(
            r#"
            SELECT id, source_id, destination_id, destination_type, payload, attempt_num, state
            FROM egress_jobs
            WHERE state = 'executing' AND destination_type = ANY($1)
            LIMIT $2
            "#,
            &types,
            limit
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Job {
                job_id: row.id,
                source_id: row.source_id,
                destination_id: row.destination_id,
                destination_type: row.destination_type.parse().unwrap_or(DestinationType::S3),
                payload: row.payload,
                attempt_num: row.attempt_num,
                state: JobState::from(row.state),
            })
            .collect())
    }

    async fn update_job_status(
        &self,
        updates: &[JobStatusUpdate],
        destination_types: &[DestinationType],
        source_id: &str,
    ) -> EgressResult<()> {
        let types = Self::type_strings(destination_types);
        let mut tx = self.pool.begin().await?;

        for update in updates {
            sqlx::query!(
                r#"
                UPDATE egress_jobs
                SET state = $1, attempt_num = $2, response = $3, updated_at = now()
                WHERE id = $4 AND source_id = $5 AND destination_type = ANY($6)
                "#,
                update.state.as_str(),
                update.attempt_num,
                update.response,
                update.job_id,
                source_id,
                &types
            )
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn reset_orphaned_executing(&self) -> EgressResult<u64> {
        let result = sqlx::query!(
            r#"UPDATE egress_jobs SET state = 'failed', updated_at = now() WHERE state = 'executing'"#
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

async fn fetch_jobs(
    pool: &PgPool,
    destination_types: &[DestinationType],
    source_id: &str,
    state: &str,
    attempted_before: Option<bool>,
    limit: i64,
) -> EgressResult<Vec<Job>> {
    let types: Vec<String> = destination_types.iter().map(|t| t.as_str().to_string()).collect();

    let rows = match attempted_before {
        Some(true) => {
            sqlx::query!(
                r#"
                SELECT id, source_id, destination_id, destination_type, payload, attempt_num, state
                FROM egress_jobs
                WHERE state = $1 AND source_id = $2 AND destination_type = ANY($3) AND attempt_num > 0
                ORDER BY id
                LIMIT $4
                "#,
                state,
                source_id,
                &types,
                limit
            )
            .fetch_all(pool)
            .await?
        },
        Some(false) => {
            sqlx::query!(
                r#"
                SELECT id, source_id, destination_id, destination_type, payload, attempt_num, state
                FROM egress_jobs
                WHERE state = $1 AND source_id = $2 AND destination_type = ANY($3) AND attempt_num = 0
                ORDER BY id
                LIMIT $4
                "#,
                state,
                source_id,
                &types,
                limit
            )
            .fetch_all(pool)
            .await?
        },
        None => {
            sqlx::query!(
                r#"
                SELECT id, source_id, destination_id, destination_type, payload, attempt_num, state
                FROM egress_jobs
                WHERE state = $1 AND source_id = $2 AND destination_type = ANY($3)
                ORDER BY id
                LIMIT $4
                "#,
                state,
                source_id,
                &types,
                limit
            )
            .fetch_all(pool)
            .await?
        },
    };

    Ok(rows
        .into_iter()
        .map(|row| Job {
            job_id: row.id,
            source_id: row.source_id,
            destination_id: row.destination_id,
            destination_type: row.destination_type.parse().unwrap_or(DestinationType::S3),
            payload: row.payload,
            attempt_num: row.attempt_num,
            state: JobState::from(row.state),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_strings() {
        let types = PgJobQueue::type_strings(&[DestinationType::S3, DestinationType::Rs]);
        assert_eq!(types, vec!["S3".to_string(), "RS".to_string()]);
    }
}
