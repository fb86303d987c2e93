//! Redshift driver
//!
//! Redshift speaks the Postgres wire protocol, so the same `sqlx::PgPool`
//! the rest of this crate uses against the control-plane database also
//! reaches the warehouse cluster — just pointed at a different DSN. Schema
//! migration and data export are plain SQL issued over that pool; nothing
//! Redshift-specific needs its own client.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{info, instrument, warn};

use crate::error::{EgressError, EgressResult};
use crate::storage::ObjectStorageDriver;

use super::super::types::{LoadFileRecord, Schema, UploadRecord, RECEIVED_AT_COLUMN};
use super::{build_manifest, group_load_files_by_table, sql_type_for, SqlDialect, WarehouseDriver};

/// `COPY` options the spec pins for Redshift loads: tolerate ragged/short
/// rows, coerce blanks to null, accept loosely-formatted dates, and skip the
/// post-load `ANALYZE` (`COMPUPDATE OFF`) since this loader runs frequently.
const COPY_OPTIONS: &str =
    "TRUNCATECOLUMNS EMPTYASNULL BLANKSASNULL FILLRECORD ACCEPTANYDATE TRIMBLANKS ACCEPTINVCHARS COMPUPDATE OFF";

pub struct RedshiftDriver {
    pool: PgPool,
    storage: Arc<dyn ObjectStorageDriver>,
    iam_role_arn: String,
    manifest_bucket: String,
    region: String,
}

impl RedshiftDriver {
    pub fn new(
        pool: PgPool,
        storage: Arc<dyn ObjectStorageDriver>,
        iam_role_arn: String,
        manifest_bucket: String,
        region: String,
    ) -> Self {
        Self {
            pool,
            storage,
            iam_role_arn,
            manifest_bucket,
            region,
        }
    }

    fn quote_ident(ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn qualified_table(namespace: &str, table: &str) -> String {
        format!("{}.{}", Self::quote_ident(namespace), Self::quote_ident(table))
    }
}

#[async_trait]
impl WarehouseDriver for RedshiftDriver {
    #[instrument(skip(self, new_columns))]
    async fn migrate_schema(&self, upload: &UploadRecord, new_columns: &Schema) -> EgressResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            Self::quote_ident(&upload.namespace)
        ))
        .execute(&mut *tx)
        .await?;

        for (table, columns) in new_columns {
            let qualified = Self::qualified_table(&upload.namespace, table);
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {} ({} VARCHAR(65535))",
                qualified,
                Self::quote_ident("_placeholder")
            ))
            .execute(&mut *tx)
            .await?;

            for (column, dtype) in columns {
                let sql_type = sql_type_for(SqlDialect::Redshift, dtype);
                let stmt = format!(
                    "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {}",
                    qualified,
                    Self::quote_ident(column),
                    sql_type
                );
                sqlx::query(&stmt).execute(&mut *tx).await?;
            }

            sqlx::query(&format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} TIMESTAMP",
                qualified,
                Self::quote_ident(RECEIVED_AT_COLUMN)
            ))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(upload_id = upload.id, "migrated redshift schema");
        Ok(())
    }

    #[instrument(skip(self, load_files))]
    async fn export(&self, upload: &UploadRecord, load_files: &[LoadFileRecord]) -> EgressResult<()> {
        let grouped = group_load_files_by_table(load_files);

        for (table, files) in grouped {
            let qualified = Self::qualified_table(&upload.namespace, &table);
            let staging = format!("{}_stage_{}", table, upload.id);
            let qualified_staging = Self::qualified_table(&upload.namespace, &staging);

            let manifest = build_manifest(&files.into_iter().cloned().collect::<Vec<_>>());
            let manifest_key = format!("manifests/{}/{}/{}.json", upload.id, table, upload.namespace);
            let manifest_body = serde_json::to_vec(&serde_json::json!({ "entries": manifest }))?;
            let manifest_result = self
                .storage
                .upload(&self.manifest_bucket, &manifest_key, manifest_body)
                .await
                .map_err(|e| EgressError::Storage(e.to_string()))?;
            let manifest_url = manifest_result.location();

            let mut tx = self.pool.begin().await?;

            sqlx::query(&format!(
                "CREATE TABLE {} (LIKE {})",
                qualified_staging, qualified
            ))
            .execute(&mut *tx)
            .await?;

            let copy_stmt = format!(
                "COPY {} FROM '{}' IAM_ROLE '{}' REGION '{}' MANIFEST FORMAT AS CSV GZIP IGNOREHEADER 1 {}",
                qualified_staging, manifest_url, self.iam_role_arn, self.region, COPY_OPTIONS
            );
            sqlx::query(&copy_stmt).execute(&mut *tx).await?;

            if has_id_column(&upload.schema, &table) {
                // Both the ranking window and the dedup select order by
                // received_at descending, so on an id collision the row
                // that survives is the one with the latest received_at,
                // not whichever one happens to sort first by id.
                let dedupe = format!(
                    r#"
                    DELETE FROM {target} USING (
                        SELECT id FROM (
                            SELECT id, ROW_NUMBER() OVER (PARTITION BY id ORDER BY {received_at} DESC) AS rn
                            FROM {staging}
                        ) ranked WHERE rn = 1
                    ) dedup WHERE {target}.id = dedup.id
                    "#,
                    target = qualified,
                    staging = qualified_staging,
                    received_at = RECEIVED_AT_COLUMN
                );
                sqlx::query(&dedupe).execute(&mut *tx).await?;

                let insert = format!(
                    "INSERT INTO {} SELECT DISTINCT ON (id) * FROM {} ORDER BY id, {} DESC",
                    qualified, qualified_staging, RECEIVED_AT_COLUMN
                );
                sqlx::query(&insert).execute(&mut *tx).await?;
            } else {
                warn!(table = %table, "no id column in schema, exporting without dedup");
                let insert = format!("INSERT INTO {} SELECT * FROM {}", qualified, qualified_staging);
                sqlx::query(&insert).execute(&mut *tx).await?;
            }

            sqlx::query(&format!("DROP TABLE {}", qualified_staging)).execute(&mut *tx).await?;

            tx.commit()
                .await
                .map_err(|e| EgressError::Warehouse(format!("export commit failed for {table}: {e}")))?;
        }

        info!(upload_id = upload.id, "exported upload to redshift");
        Ok(())
    }
}

fn has_id_column(schema: &Schema, table: &str) -> bool {
    schema.get(table).map(|cols| cols.contains_key("id")).unwrap_or(false)
}
