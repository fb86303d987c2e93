//! Warehouse driver (C9)
//!
//! Two phases per upload: `migrate_schema` applies any column additions the
//! schema consolidator found missing from the destination table, then
//! `export` loads the upload's load files into the destination and dedupes
//! against rows already present.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::EgressResult;

use super::types::{LoadFileRecord, Schema, UploadRecord};

pub mod bigquery;
pub mod redshift;

#[async_trait]
pub trait WarehouseDriver: Send + Sync {
    async fn migrate_schema(&self, upload: &UploadRecord, new_columns: &Schema) -> EgressResult<()>;
    async fn export(&self, upload: &UploadRecord, load_files: &[LoadFileRecord]) -> EgressResult<()>;
}

/// One row per load file, the shape both the Redshift `COPY FROM manifest`
/// statement and a BigQuery load job's source-file list need.
#[derive(Debug, Clone, Serialize)]
pub struct ManifestEntry {
    pub url: String,
    pub mandatory: bool,
}

pub fn build_manifest(load_files: &[LoadFileRecord]) -> Vec<ManifestEntry> {
    load_files
        .iter()
        .map(|f| ManifestEntry {
            url: f.location.clone(),
            mandatory: true,
        })
        .collect()
}

/// Groups load files by table, since the driver issues one load statement
/// per destination table.
pub fn group_load_files_by_table(
    load_files: &[LoadFileRecord],
) -> std::collections::BTreeMap<String, Vec<&LoadFileRecord>> {
    let mut grouped: std::collections::BTreeMap<String, Vec<&LoadFileRecord>> = std::collections::BTreeMap::new();
    for file in load_files {
        grouped.entry(file.table_name.clone()).or_default().push(file);
    }
    grouped
}

/// Maps a generic egress column type to the SQL type name a given
/// destination dialect expects for `ALTER TABLE ADD COLUMN` / `CREATE TABLE`.
pub fn sql_type_for(dialect: SqlDialect, egress_type: &str) -> &'static str {
    match (dialect, egress_type) {
        (_, "boolean") => "BOOLEAN",
        // Redshift collapses all three numeric kinds to one type; only
        // BigQuery keeps int/bigint distinct from float.
        (SqlDialect::Redshift, "int" | "bigint" | "float") => "DOUBLE PRECISION",
        (SqlDialect::BigQuery, "int") => "INTEGER",
        (SqlDialect::BigQuery, "bigint") => "BIGINT",
        (SqlDialect::BigQuery, "float") => "DOUBLE PRECISION",
        (SqlDialect::Redshift, "datetime") => "TIMESTAMP",
        (SqlDialect::BigQuery, "datetime") => "TIMESTAMP",
        (SqlDialect::Redshift, _) => "VARCHAR(65535)",
        (SqlDialect::BigQuery, _) => "STRING",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Redshift,
    BigQuery,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DestinationType;
    use chrono::Utc;

    fn load_file(table: &str, location: &str) -> LoadFileRecord {
        LoadFileRecord {
            id: 1,
            staging_file_id: 1,
            source_id: "src1".to_string(),
            destination_id: "dest1".to_string(),
            destination_type: DestinationType::Rs,
            table_name: table.to_string(),
            location: location.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_build_manifest_marks_entries_mandatory() {
        let files = vec![load_file("users", "s3://bucket/a.csv.gz")];
        let manifest = build_manifest(&files);
        assert_eq!(manifest.len(), 1);
        assert!(manifest[0].mandatory);
    }

    #[test]
    fn test_group_load_files_by_table() {
        let files = vec![load_file("users", "a"), load_file("events", "b"), load_file("users", "c")];
        let grouped = group_load_files_by_table(&files);
        assert_eq!(grouped["users"].len(), 2);
        assert_eq!(grouped["events"].len(), 1);
    }

    #[test]
    fn test_sql_type_mapping_differs_by_dialect_for_strings() {
        assert_eq!(sql_type_for(SqlDialect::Redshift, "string"), "VARCHAR(65535)");
        assert_eq!(sql_type_for(SqlDialect::BigQuery, "string"), "STRING");
    }

    #[test]
    fn test_redshift_numerics_all_collapse_to_double_precision() {
        assert_eq!(sql_type_for(SqlDialect::Redshift, "int"), "DOUBLE PRECISION");
        assert_eq!(sql_type_for(SqlDialect::Redshift, "bigint"), "DOUBLE PRECISION");
        assert_eq!(sql_type_for(SqlDialect::Redshift, "float"), "DOUBLE PRECISION");
    }

    #[test]
    fn test_bigquery_numerics_stay_distinct() {
        assert_eq!(sql_type_for(SqlDialect::BigQuery, "int"), "INTEGER");
        assert_eq!(sql_type_for(SqlDialect::BigQuery, "bigint"), "BIGINT");
        assert_eq!(sql_type_for(SqlDialect::BigQuery, "float"), "DOUBLE PRECISION");
    }
}
