//! Persisted catalog access for the warehouse uploader.
//!
//! Backs the four tables named in the external interfaces: `wh_staging_files`,
//! `wh_uploads`, `wh_load_files`, `wh_schemas`. Schema and job payloads are
//! stored as `jsonb`, matching the rest of the workspace's sqlx usage.

use sqlx::PgPool;

use crate::error::EgressResult;
use crate::types::DestinationType;

use super::types::{LoadFileRecord, Schema, StagingFileRecord, StagingFileStatus, UploadRecord, UploadState};

pub struct Catalog {
    pool: PgPool,
}

impl Catalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_staging_file(
        &self,
        source_id: &str,
        destination_id: &str,
        location: &str,
        schema: &Schema,
    ) -> EgressResult<i64> {
        let schema_json = serde_json::to_value(schema)?;
        let row = sqlx::query!(
            r#"
            INSERT INTO wh_staging_files (source_id, destination_id, location, schema, status)
            VALUES ($1, $2, $3, $4, 'waiting')
            RETURNING id
            "#,
            source_id,
            destination_id,
            location,
            schema_json
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.id)
    }

    pub async fn mark_staging_file_status(
        &self,
        id: i64,
        status: StagingFileStatus,
        error: Option<&str>,
    ) -> EgressResult<()> {
        sqlx::query!(
            "UPDATE wh_staging_files SET status = $1, error = $2 WHERE id = $3",
            status.as_str(),
            error,
            id
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Contiguous, unprocessed staging files for a binding, oldest first,
    /// page-bounded (§4.6).
    pub async fn pending_staging_files(
        &self,
        source_id: &str,
        destination_id: &str,
        page_size: i64,
    ) -> EgressResult<Vec<StagingFileRecord>> {
        let rows = sqlx::query!(
            r#"
            SELECT id, source_id, destination_id, location, schema, status, error, created_at
            FROM wh_staging_files
            WHERE source_id = $1 AND destination_id = $2 AND status = 'waiting'
            ORDER BY id
            LIMIT $3
            "#,
            source_id,
            destination_id,
            page_size
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let schema: Schema = serde_json::from_value(row.schema)?;
                Ok(StagingFileRecord {
                    id: row.id,
                    source_id: row.source_id,
                    destination_id: row.destination_id,
                    location: row.location,
                    schema,
                    status: StagingFileStatus::from(row.status),
                    error: row.error,
                    created_at: row.created_at,
                })
            })
            .collect()
    }

    pub async fn create_upload(
        &self,
        source_id: &str,
        destination_id: &str,
        destination_type: DestinationType,
        namespace: &str,
        start_staging_file_id: i64,
        end_staging_file_id: i64,
        schema: &Schema,
    ) -> EgressResult<i64> {
        let schema_json = serde_json::to_value(schema)?;
        let row = sqlx::query!(
            r#"
            INSERT INTO wh_uploads
                (source_id, destination_id, destination_type, namespace,
                 start_staging_file_id, end_staging_file_id, status, schema)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
            source_id,
            destination_id,
            destination_type.as_str(),
            namespace,
            start_staging_file_id,
            end_staging_file_id,
            UploadState::GeneratingLoadFile.as_str(),
            schema_json
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.id)
    }

    /// The newest non-terminal upload for a binding, if any — used for the
    /// resume check before starting a fresh one (§4.6).
    pub async fn in_progress_upload(
        &self,
        source_id: &str,
        destination_id: &str,
    ) -> EgressResult<Option<UploadRecord>> {
        let row = sqlx::query!(
            r#"
            SELECT id, source_id, destination_id, destination_type, namespace,
                   start_staging_file_id, end_staging_file_id,
                   start_load_file_id, end_load_file_id,
                   status, schema, error, created_at, updated_at
            FROM wh_uploads
            WHERE source_id = $1 AND destination_id = $2
              AND status NOT IN ('exported_data', 'aborted')
            ORDER BY id DESC
            LIMIT 1
            "#,
            source_id,
            destination_id
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> EgressResult<UploadRecord> {
            let schema: Schema = serde_json::from_value(row.schema)?;
            Ok(UploadRecord {
                id: row.id,
                source_id: row.source_id,
                destination_id: row.destination_id,
                destination_type: row.destination_type.parse().unwrap_or(DestinationType::Rs),
                namespace: row.namespace,
                start_staging_file_id: row.start_staging_file_id,
                end_staging_file_id: row.end_staging_file_id,
                start_load_file_id: row.start_load_file_id,
                end_load_file_id: row.end_load_file_id,
                status: UploadState::from(row.status),
                schema,
                error: row.error,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
        })
        .transpose()
    }

    pub async fn set_upload_status(
        &self,
        id: i64,
        status: UploadState,
        error: Option<&serde_json::Value>,
    ) -> EgressResult<()> {
        sqlx::query!(
            "UPDATE wh_uploads SET status = $1, error = $2, updated_at = now() WHERE id = $3",
            status.as_str(),
            error,
            id
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_upload_load_file_range(
        &self,
        id: i64,
        start_load_file_id: i64,
        end_load_file_id: i64,
    ) -> EgressResult<()> {
        sqlx::query!(
            r#"
            UPDATE wh_uploads
            SET start_load_file_id = $1, end_load_file_id = $2, status = $3, updated_at = now()
            WHERE id = $4
            "#,
            start_load_file_id,
            end_load_file_id,
            UploadState::GeneratedLoadFile.as_str(),
            id
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_files_for_upload(&self, upload: &UploadRecord) -> EgressResult<Vec<LoadFileRecord>> {
        let (start, end) = match (upload.start_load_file_id, upload.end_load_file_id) {
            (Some(s), Some(e)) => (s, e),
            _ => return Ok(Vec::new()),
        };
        let rows = sqlx::query!(
            r#"
            SELECT id, staging_file_id, source_id, destination_id, destination_type, table_name, location, created_at
            FROM wh_load_files
            WHERE id BETWEEN $1 AND $2
            ORDER BY id
            "#,
            start,
            end
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| LoadFileRecord {
                id: row.id,
                staging_file_id: row.staging_file_id,
                source_id: row.source_id,
                destination_id: row.destination_id,
                destination_type: row.destination_type.parse().unwrap_or(DestinationType::Rs),
                table_name: row.table_name,
                location: row.location,
                created_at: row.created_at,
            })
            .collect())
    }

    pub async fn insert_load_file(
        &self,
        staging_file_id: i64,
        source_id: &str,
        destination_id: &str,
        destination_type: DestinationType,
        table_name: &str,
        location: &str,
    ) -> EgressResult<i64> {
        let row = sqlx::query!(
            r#"
            INSERT INTO wh_load_files
                (staging_file_id, source_id, destination_id, destination_type, table_name, location)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
            staging_file_id,
            source_id,
            destination_id,
            destination_type.as_str(),
            table_name,
            location
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.id)
    }

    /// The currently migrated schema for a binding's namespace, if any.
    pub async fn current_schema(&self, source_id: &str, destination_id: &str) -> EgressResult<Option<Schema>> {
        let row = sqlx::query!(
            r#"SELECT schema FROM wh_schemas WHERE source_id = $1 AND destination_id = $2"#,
            source_id,
            destination_id
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| serde_json::from_value(row.schema).map_err(Into::into)).transpose()
    }

    pub async fn upsert_current_schema(
        &self,
        source_id: &str,
        destination_id: &str,
        schema: &Schema,
    ) -> EgressResult<()> {
        let schema_json = serde_json::to_value(schema)?;
        sqlx::query!(
            r#"
            INSERT INTO wh_schemas (source_id, destination_id, schema)
            VALUES ($1, $2, $3)
            ON CONFLICT (source_id, destination_id)
            DO UPDATE SET schema = $3, updated_at = now()
            "#,
            source_id,
            destination_id,
            schema_json
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
