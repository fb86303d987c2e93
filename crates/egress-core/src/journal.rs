//! Journal (C1)
//!
//! Append-only log of in-flight object-storage uploads, written before the
//! upload starts and deleted once it resolves. On restart, any entry still
//! present names an upload that was interrupted mid-flight; the batch
//! router uses these to rebuild its crash-recovery dedup cache (see
//! `router::dedup_cache`).

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::EgressResult;

pub const OP_TYPE_RAW_UPLOAD: &str = "raw_upload";

/// Payload recorded for a `raw_upload` journal entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawUploadPayload {
    pub provider: String,
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub op_id: Uuid,
    pub op_type: String,
    pub payload: serde_json::Value,
}

pub struct Journal {
    pool: PgPool,
}

impl Journal {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Records the start of an operation, returning its id for later
    /// deletion. Must be written before the operation it guards begins.
    pub async fn mark_start(
        &self,
        op_type: &str,
        payload: &serde_json::Value,
    ) -> EgressResult<Uuid> {
        let row = sqlx::query!(
            r#"
            INSERT INTO egress_journal (op_type, payload)
            VALUES ($1, $2)
            RETURNING id
            "#,
            op_type,
            payload
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(row.id)
    }

    /// Deletes a journal entry once its operation has resolved, succeeded
    /// or failed.
    pub async fn delete(&self, op_id: Uuid) -> EgressResult<()> {
        sqlx::query!("DELETE FROM egress_journal WHERE id = $1", op_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Lists every entry of a given op type still present — i.e. every
    /// operation that was interrupted before it could resolve.
    pub async fn list(&self, op_type: &str) -> EgressResult<Vec<JournalEntry>> {
        let rows = sqlx::query!(
            r#"SELECT id, op_type, payload FROM egress_journal WHERE op_type = $1"#,
            op_type
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| JournalEntry {
                op_id: row.id,
                op_type: row.op_type,
                payload: row.payload,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_upload_payload_round_trips_through_json() {
        let payload = RawUploadPayload {
            provider: "S3".to_string(),
            bucket: "rudder-logs".to_string(),
            key: "raw/src1/07-28-2026/file.json.gz".to_string(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        let parsed: RawUploadPayload = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.bucket, "rudder-logs");
        assert_eq!(parsed.key, "raw/src1/07-28-2026/file.json.gz");
    }
}
