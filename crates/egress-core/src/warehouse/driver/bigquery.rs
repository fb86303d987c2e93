//! BigQuery driver
//!
//! BigQuery has no Postgres-wire-compatible endpoint, so this adapter talks
//! to the REST API directly over `reqwest` rather than reusing the sqlx
//! pool, mirroring how the rest of this workspace reaches for `reqwest`
//! whenever a destination needs plain HTTP instead of a driver crate.

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, instrument};

use crate::error::{EgressError, EgressResult};

use super::super::types::{LoadFileRecord, Schema, UploadRecord, RECEIVED_AT_COLUMN};
use super::{group_load_files_by_table, sql_type_for, SqlDialect, WarehouseDriver};

pub struct BigQueryDriver {
    client: reqwest::Client,
    project_id: String,
    access_token: String,
}

impl BigQueryDriver {
    pub fn new(project_id: String, access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            project_id,
            access_token,
        }
    }

    fn tables_url(&self, dataset: &str, table: &str) -> String {
        format!(
            "https://bigquery.googleapis.com/bigquery/v2/projects/{}/datasets/{}/tables/{}",
            self.project_id, dataset, table
        )
    }

    fn jobs_url(&self) -> String {
        format!(
            "https://bigquery.googleapis.com/bigquery/v2/projects/{}/jobs",
            self.project_id
        )
    }
}

#[async_trait]
impl WarehouseDriver for BigQueryDriver {
    #[instrument(skip(self, new_columns))]
    async fn migrate_schema(&self, upload: &UploadRecord, new_columns: &Schema) -> EgressResult<()> {
        for (table, columns) in new_columns {
            let mut fields: Vec<_> = columns
                .iter()
                .map(|(name, dtype)| json!({"name": name, "type": sql_type_for(SqlDialect::BigQuery, dtype)}))
                .collect();
            fields.push(json!({"name": RECEIVED_AT_COLUMN, "type": "TIMESTAMP"}));

            let body = json!({
                "schema": { "fields": fields },
                "schemaUpdateOptions": ["ALLOW_FIELD_ADDITION"],
            });

            let response = self
                .client
                .patch(self.tables_url(&upload.namespace, table))
                .bearer_auth(&self.access_token)
                .json(&body)
                .send()
                .await
                .map_err(|e| EgressError::Warehouse(format!("bigquery schema patch failed: {e}")))?;

            if !response.status().is_success() {
                return Err(EgressError::Warehouse(format!(
                    "bigquery schema patch for {table} returned {}",
                    response.status()
                )));
            }
        }

        info!(upload_id = upload.id, "migrated bigquery schema");
        Ok(())
    }

    #[instrument(skip(self, load_files))]
    async fn export(&self, upload: &UploadRecord, load_files: &[LoadFileRecord]) -> EgressResult<()> {
        let grouped = group_load_files_by_table(load_files);

        for (table, files) in grouped {
            let source_uris: Vec<String> = files.iter().map(|f| f.location.clone()).collect();

            let body = json!({
                "configuration": {
                    "load": {
                        "sourceUris": source_uris,
                        "sourceFormat": "CSV",
                        "skipLeadingRows": 1,
                        "destinationTable": {
                            "projectId": self.project_id,
                            "datasetId": upload.namespace,
                            "tableId": table,
                        },
                        "writeDisposition": "WRITE_APPEND",
                    }
                }
            });

            let response = self
                .client
                .post(self.jobs_url())
                .bearer_auth(&self.access_token)
                .json(&body)
                .send()
                .await
                .map_err(|e| EgressError::Warehouse(format!("bigquery load job failed: {e}")))?;

            if !response.status().is_success() {
                return Err(EgressError::Warehouse(format!(
                    "bigquery load job for {table} returned {}",
                    response.status()
                )));
            }
        }

        info!(upload_id = upload.id, "exported upload to bigquery");
        Ok(())
    }
}
