//! Load-file builder pool (C8)
//!
//! Downloads a staging file, groups its records by destination table, and
//! emits one gzip-compressed CSV load file per table with columns sorted
//! alphabetically — the column order the driver's `COPY`/load statement
//! must agree with. Columns come from the upload's consolidated schema, not
//! the staging file's own: a staging table created `LIKE` the fully
//! migrated destination has every column the whole upload's union of
//! staging files introduced, so a CSV built from a narrower per-file schema
//! would load with fewer columns than the staging table has and every value
//! after the first missing column would shift into the wrong destination
//! column.
//!
//! The teacher's ingest worker pool built per-item results by pushing into a
//! shared `Vec` from inside concurrent futures, which is exactly the
//! unsynchronized-mutation bug this module avoids: every per-table future
//! below returns its own `(table_name, load_file_id)` and the caller
//! collects results from `try_join_all`'s return value, never a shared
//! mutable accumulator touched from multiple tasks.

use std::collections::BTreeMap;
use std::io::Write;

use chrono::{DateTime, SecondsFormat, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::future::try_join_all;

use crate::error::{EgressError, EgressResult};
use crate::storage::ObjectStorageDriver;
use crate::types::DestinationType;

use super::catalog::Catalog;
use super::types::{Schema, StagedRecord, StagingFileRecord, TableSchema, RECEIVED_AT_COLUMN};

pub struct LoadFileBuilder {
    storage: std::sync::Arc<dyn ObjectStorageDriver>,
    catalog: std::sync::Arc<Catalog>,
    load_objects_bucket: String,
    load_objects_folder_name: String,
}

impl LoadFileBuilder {
    pub fn new(
        storage: std::sync::Arc<dyn ObjectStorageDriver>,
        catalog: std::sync::Arc<Catalog>,
        load_objects_bucket: String,
        load_objects_folder_name: String,
    ) -> Self {
        Self {
            storage,
            catalog,
            load_objects_bucket,
            load_objects_folder_name,
        }
    }

    /// Downloads and groups a staging file's records by table, then builds
    /// and persists one load file per table concurrently. `upload_schema` is
    /// the upload-wide consolidated schema (every table/column the whole
    /// upload's staging files introduced), not this one staging file's own
    /// schema — the destination's staging table is created from that wider
    /// union, so every load file feeding it must agree on the same column
    /// set.
    pub async fn build_for_staging_file(
        &self,
        staging_file: &StagingFileRecord,
        upload_schema: &Schema,
        destination_type: DestinationType,
    ) -> EgressResult<Vec<i64>> {
        let raw = download_staging_object(self.storage.as_ref(), &staging_file.location).await?;
        let records = parse_staged_records(&raw)?;
        let grouped = group_by_table(records);

        let tasks = grouped.into_iter().map(|(table, rows)| {
            let staging_file = staging_file.clone();
            let columns = upload_schema
                .get(&table)
                .cloned()
                .unwrap_or_else(|| infer_columns(&rows));
            async move {
                let csv_bytes = build_csv(&columns, &rows);
                let gz_bytes = gzip(&csv_bytes)?;

                let key = load_file_key(
                    &self.load_objects_folder_name,
                    &staging_file.source_id,
                    &staging_file.destination_id,
                    &table,
                );
                let result = self
                    .storage
                    .upload(&self.load_objects_bucket, &key, gz_bytes)
                    .await
                    .map_err(|e| EgressError::Storage(e.to_string()))?;

                self.catalog
                    .insert_load_file(
                        staging_file.id,
                        &staging_file.source_id,
                        &staging_file.destination_id,
                        destination_type,
                        &table,
                        &result.location(),
                    )
                    .await
            }
        });

        try_join_all(tasks).await
    }
}

fn group_by_table(records: Vec<StagedRecord>) -> BTreeMap<String, Vec<StagedRecord>> {
    let mut grouped: BTreeMap<String, Vec<StagedRecord>> = BTreeMap::new();
    for record in records {
        grouped.entry(record.table.clone()).or_default().push(record);
    }
    grouped
}

fn infer_columns(rows: &[StagedRecord]) -> TableSchema {
    let mut columns = TableSchema::new();
    for row in rows {
        for (name, dtype) in &row.columns {
            columns.entry(name.clone()).or_insert_with(|| dtype.clone());
        }
    }
    columns
}

/// Builds CSV content with a header row, columns sorted alphabetically
/// (`TableSchema` is a `BTreeMap`, so iteration order is already sorted),
/// followed by the `received_at` column every table carries regardless of
/// its declared schema (§4.8 step 3).
fn build_csv(columns: &TableSchema, rows: &[StagedRecord]) -> Vec<u8> {
    let mut out = Vec::new();
    let names: Vec<&String> = columns.keys().collect();

    let mut header_fields: Vec<String> = names.iter().map(|n| csv_escape(n)).collect();
    header_fields.push(RECEIVED_AT_COLUMN.to_string());
    out.extend_from_slice(header_fields.join(",").as_bytes());
    out.push(b'\n');

    for row in rows {
        let mut fields: Vec<String> = names
            .iter()
            .map(|name| {
                row.data
                    .get(name.as_str())
                    .map(value_to_csv_field)
                    .unwrap_or_default()
            })
            .collect();
        fields.push(row.received_at.to_rfc3339_opts(SecondsFormat::Millis, true));
        out.extend_from_slice(fields.join(",").as_bytes());
        out.push(b'\n');
    }

    out
}

fn value_to_csv_field(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => csv_escape(s),
        other => csv_escape(&other.to_string()),
    }
}

/// Quotes a field if it contains a comma, quote, or newline, doubling any
/// embedded quotes. Unquoted fields pass through untouched.
fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn gzip(data: &[u8]) -> EgressResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn load_file_key(folder: &str, source_id: &str, destination_id: &str, table: &str) -> String {
    format!(
        "{}/{}/{}/{}/{}.csv.gz",
        folder,
        source_id,
        destination_id,
        table,
        uuid::Uuid::new_v4()
    )
}

async fn download_staging_object(
    storage: &dyn ObjectStorageDriver,
    location: &str,
) -> EgressResult<Vec<u8>> {
    let (bucket, key) = parse_location(location)?;
    storage
        .download(&bucket, &key)
        .await
        .map_err(|e| EgressError::Storage(e.to_string()))
}

fn parse_location(location: &str) -> EgressResult<(String, String)> {
    let rest = location
        .strip_prefix("s3://")
        .ok_or_else(|| EgressError::invariant(format!("unrecognized staging location: {location}")))?;
    let (bucket, key) = rest
        .split_once('/')
        .ok_or_else(|| EgressError::invariant(format!("unrecognized staging location: {location}")))?;
    Ok((bucket.to_string(), key.to_string()))
}

/// Parses newline-delimited JSON job payloads into staged records. Each line
/// is the same shape the batch router journals: `messageId`,
/// `metadata.table`, `metadata.columns`, `data`, and an optional
/// `receivedAt`.
fn parse_staged_records(raw: &[u8]) -> EgressResult<Vec<StagedRecord>> {
    let text = String::from_utf8_lossy(raw);
    let mut records = Vec::new();

    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let value: serde_json::Value = serde_json::from_str(line)?;
        let table = value
            .pointer("/metadata/table")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EgressError::invariant("staged record missing metadata.table"))?
            .to_string();
        let columns: TableSchema = value
            .pointer("/metadata/columns")
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|t| (k.clone(), t.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        let data = value
            .get("data")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();
        let received_at = value
            .get("receivedAt")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        records.push(StagedRecord { table, columns, data, received_at });
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(table: &str, data: serde_json::Value) -> StagedRecord {
        record_at(table, data, Utc::now())
    }

    fn record_at(table: &str, data: serde_json::Value, received_at: DateTime<Utc>) -> StagedRecord {
        StagedRecord {
            table: table.to_string(),
            columns: TableSchema::new(),
            data: data.as_object().cloned().unwrap_or_default(),
            received_at,
        }
    }

    #[test]
    fn test_csv_escape_plain_field_is_untouched() {
        assert_eq!(csv_escape("alice"), "alice");
    }

    #[test]
    fn test_csv_escape_quotes_fields_with_commas() {
        assert_eq!(csv_escape("hello, world"), "\"hello, world\"");
    }

    #[test]
    fn test_csv_escape_doubles_embedded_quotes() {
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_build_csv_sorts_columns_alphabetically() {
        let mut columns = TableSchema::new();
        columns.insert("zeta".to_string(), "string".to_string());
        columns.insert("alpha".to_string(), "string".to_string());

        let rows = vec![record("users", serde_json::json!({"zeta": "z", "alpha": "a"}))];
        let csv = String::from_utf8(build_csv(&columns, &rows)).unwrap();
        let header = csv.lines().next().unwrap();
        assert_eq!(header, "alpha,zeta,received_at");
    }

    #[test]
    fn test_build_csv_stamps_each_row_with_its_received_at() {
        let columns = TableSchema::new();
        let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let rows = vec![
            record_at("users", serde_json::json!({}), t1),
            record_at("users", serde_json::json!({}), t2),
        ];
        let csv = String::from_utf8(build_csv(&columns, &rows)).unwrap();
        let mut lines = csv.lines();
        lines.next();
        assert_eq!(lines.next().unwrap(), "2026-01-01T00:00:00.000Z");
        assert_eq!(lines.next().unwrap(), "2026-01-02T00:00:00.000Z");
    }

    #[test]
    fn test_parse_staged_records_defaults_received_at_when_absent() {
        let raw = b"{\"metadata\":{\"table\":\"users\",\"columns\":{}},\"data\":{}}\n";
        let records = parse_staged_records(raw).unwrap();
        assert!(records[0].received_at <= Utc::now());
    }

    #[test]
    fn test_parse_staged_records_reads_explicit_received_at() {
        let raw = b"{\"metadata\":{\"table\":\"users\",\"columns\":{}},\"data\":{},\"receivedAt\":\"2026-01-01T00:00:00.000Z\"}\n";
        let records = parse_staged_records(raw).unwrap();
        assert_eq!(records[0].received_at, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_group_by_table_splits_records() {
        let records = vec![
            record("users", serde_json::json!({})),
            record("events", serde_json::json!({})),
            record("users", serde_json::json!({})),
        ];
        let grouped = group_by_table(records);
        assert_eq!(grouped["users"].len(), 2);
        assert_eq!(grouped["events"].len(), 1);
    }

    #[test]
    fn test_parse_staged_records_reads_ndjson_lines() {
        let raw = b"{\"metadata\":{\"table\":\"users\",\"columns\":{\"id\":\"int\"}},\"data\":{\"id\":1}}\n{\"metadata\":{\"table\":\"users\",\"columns\":{\"id\":\"int\"}},\"data\":{\"id\":2}}\n";
        let records = parse_staged_records(raw).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].table, "users");
    }

    #[test]
    fn test_parse_location_splits_bucket_and_key() {
        let (bucket, key) = parse_location("s3://my-bucket/a/b/c.json.gz").unwrap();
        assert_eq!(bucket, "my-bucket");
        assert_eq!(key, "a/b/c.json.gz");
    }
}
