//! Schema consolidator (C7)
//!
//! Unions the per-staging-file schemas accumulated for an upload with the
//! destination's currently migrated schema, producing the superset schema
//! the load-file builder and the driver's `MigrateSchema` phase both need.
//!
//! Conflicting types for the same table/column are resolved first-seen-wins:
//! the currently migrated schema (if any) takes precedence, then staging
//! files in id order. This matches the "never narrow a column" expectation —
//! a later batch that reports a narrower type for a column already on file
//! must not downgrade it.

use std::collections::BTreeMap;

use super::types::{Schema, StagingFileRecord, TableSchema};

pub fn consolidate(current: Option<&Schema>, staging_files: &[StagingFileRecord]) -> Schema {
    let mut merged: Schema = BTreeMap::new();

    if let Some(current) = current {
        merge_into(&mut merged, current);
    }
    for file in staging_files {
        merge_into(&mut merged, &file.schema);
    }

    merged
}

fn merge_into(merged: &mut Schema, incoming: &Schema) {
    for (table, columns) in incoming {
        let entry: &mut TableSchema = merged.entry(table.clone()).or_default();
        for (column, dtype) in columns {
            entry.entry(column.clone()).or_insert_with(|| dtype.clone());
        }
    }
}

/// Columns present in `new` but absent from `existing`, grouped by table —
/// the set of `ALTER TABLE ADD COLUMN` statements the driver's
/// `MigrateSchema` phase must issue.
pub fn diff_new_columns(existing: Option<&Schema>, new: &Schema) -> Schema {
    let mut diff: Schema = BTreeMap::new();
    for (table, columns) in new {
        let existing_columns = existing.and_then(|e| e.get(table));
        for (column, dtype) in columns {
            let already_present = existing_columns.map(|cols| cols.contains_key(column)).unwrap_or(false);
            if !already_present {
                diff.entry(table.clone()).or_default().insert(column.clone(), dtype.clone());
            }
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::types::StagingFileStatus;
    use chrono::Utc;

    fn staging_file(schema: Schema) -> StagingFileRecord {
        StagingFileRecord {
            id: 1,
            source_id: "src1".to_string(),
            destination_id: "dest1".to_string(),
            location: "s3://bucket/key".to_string(),
            schema,
            status: StagingFileStatus::Waiting,
            error: None,
            created_at: Utc::now(),
        }
    }

    fn schema(pairs: &[(&str, &[(&str, &str)])]) -> Schema {
        pairs
            .iter()
            .map(|(table, cols)| {
                let cols: TableSchema = cols.iter().map(|(c, t)| (c.to_string(), t.to_string())).collect();
                (table.to_string(), cols)
            })
            .collect()
    }

    #[test]
    fn test_union_across_staging_files() {
        let f1 = staging_file(schema(&[("users", &[("id", "int")])]));
        let f2 = staging_file(schema(&[("users", &[("email", "string")])]));
        let merged = consolidate(None, &[f1, f2]);
        assert_eq!(merged["users"].len(), 2);
        assert_eq!(merged["users"]["id"], "int");
        assert_eq!(merged["users"]["email"], "string");
    }

    #[test]
    fn test_current_schema_type_wins_over_later_batch() {
        let current = schema(&[("users", &[("id", "bigint")])]);
        let f1 = staging_file(schema(&[("users", &[("id", "int")])]));
        let merged = consolidate(Some(&current), &[f1]);
        assert_eq!(merged["users"]["id"], "bigint");
    }

    #[test]
    fn test_diff_new_columns_only_reports_additions() {
        let existing = schema(&[("users", &[("id", "int")])]);
        let new = schema(&[("users", &[("id", "int"), ("email", "string")])]);
        let diff = diff_new_columns(Some(&existing), &new);
        assert_eq!(diff["users"].len(), 1);
        assert!(diff["users"].contains_key("email"));
    }

    #[test]
    fn test_diff_new_columns_with_no_existing_schema_reports_everything() {
        let new = schema(&[("users", &[("id", "int")])]);
        let diff = diff_new_columns(None, &new);
        assert_eq!(diff["users"].len(), 1);
    }
}
