//! Warehouse Uploader data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::types::DestinationType;

/// Column name -> SQL-ish type name (`boolean|int|bigint|float|string|datetime`),
/// sorted so load-file column ordering is deterministic (§4.8).
pub type TableSchema = BTreeMap<String, String>;

/// `table -> column -> type`, the unit the schema consolidator (C7) unions.
pub type Schema = BTreeMap<String, TableSchema>;

/// Every table carries this column in addition to whatever the schema
/// consolidator unions. It is never part of `Schema`/`TableSchema` — it is
/// stamped onto every record by the load-file builder (§4.8) and is the
/// column the warehouse driver's upsert dedupes on when a primary key
/// collides (§4.9.2), not a user-supplied field.
pub const RECEIVED_AT_COLUMN: &str = "received_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingFileStatus {
    Waiting,
    Executing,
    Succeeded,
    Failed,
}

impl StagingFileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StagingFileStatus::Waiting => "waiting",
            StagingFileStatus::Executing => "executing",
            StagingFileStatus::Succeeded => "succeeded",
            StagingFileStatus::Failed => "failed",
        }
    }
}

impl From<String> for StagingFileStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "executing" => StagingFileStatus::Executing,
            "succeeded" => StagingFileStatus::Succeeded,
            "failed" => StagingFileStatus::Failed,
            _ => StagingFileStatus::Waiting,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StagingFileRecord {
    pub id: i64,
    pub source_id: String,
    pub destination_id: String,
    pub location: String,
    pub schema: Schema,
    pub status: StagingFileStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Persistent, ordered state of one warehouse upload. Each non-`_failed`
/// state but the first has a paired `_failed` state (§3). Terminal states
/// are `ExportedData` and `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    GeneratingLoadFile,
    GeneratingLoadFileFailed,
    GeneratedLoadFile,
    UpdatingSchema,
    UpdatingSchemaFailed,
    UpdatedSchema,
    ExportingData,
    ExportingDataFailed,
    ExportedData,
    Aborted,
}

impl UploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadState::GeneratingLoadFile => "generating_load_file",
            UploadState::GeneratingLoadFileFailed => "generating_load_file_failed",
            UploadState::GeneratedLoadFile => "generated_load_file",
            UploadState::UpdatingSchema => "updating_schema",
            UploadState::UpdatingSchemaFailed => "updating_schema_failed",
            UploadState::UpdatedSchema => "updated_schema",
            UploadState::ExportingData => "exporting_data",
            UploadState::ExportingDataFailed => "exporting_data_failed",
            UploadState::ExportedData => "exported_data",
            UploadState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::ExportedData | UploadState::Aborted)
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            UploadState::GeneratingLoadFileFailed
                | UploadState::UpdatingSchemaFailed
                | UploadState::ExportingDataFailed
        )
    }

    /// The paired failed state for a non-terminal, non-failed state.
    pub fn failed_variant(&self) -> UploadState {
        match self {
            UploadState::GeneratingLoadFile => UploadState::GeneratingLoadFileFailed,
            UploadState::UpdatingSchema => UploadState::UpdatingSchemaFailed,
            UploadState::ExportingData => UploadState::ExportingDataFailed,
            other => *other,
        }
    }
}

impl From<String> for UploadState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "generating_load_file_failed" => UploadState::GeneratingLoadFileFailed,
            "generated_load_file" => UploadState::GeneratedLoadFile,
            "updating_schema" => UploadState::UpdatingSchema,
            "updating_schema_failed" => UploadState::UpdatingSchemaFailed,
            "updated_schema" => UploadState::UpdatedSchema,
            "exporting_data" => UploadState::ExportingData,
            "exporting_data_failed" => UploadState::ExportingDataFailed,
            "exported_data" => UploadState::ExportedData,
            "aborted" => UploadState::Aborted,
            _ => UploadState::GeneratingLoadFile,
        }
    }
}

impl std::fmt::Display for UploadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which stage of the warehouse driver an in-progress upload should resume
/// at (§4.6 resume check).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeStage {
    /// Generate load files first (fresh upload or retry of that stage).
    GenerateLoadFiles,
    /// Load files already exist; (re-)run schema migration then export.
    UpdateSchema,
    /// Schema already migrated; (re-)run export only.
    ExportData,
}

impl UploadState {
    pub fn resume_stage(&self) -> ResumeStage {
        match self {
            UploadState::UpdatedSchema | UploadState::ExportingData | UploadState::ExportingDataFailed => {
                ResumeStage::ExportData
            },
            UploadState::GeneratedLoadFile | UploadState::UpdatingSchema | UploadState::UpdatingSchemaFailed => {
                ResumeStage::UpdateSchema
            },
            _ => ResumeStage::GenerateLoadFiles,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub id: i64,
    pub source_id: String,
    pub destination_id: String,
    pub destination_type: DestinationType,
    pub namespace: String,
    pub start_staging_file_id: i64,
    pub end_staging_file_id: i64,
    pub start_load_file_id: Option<i64>,
    pub end_load_file_id: Option<i64>,
    pub status: UploadState,
    pub schema: Schema,
    pub error: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadRecord {
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.updated_at
    }
}

#[derive(Debug, Clone)]
pub struct LoadFileRecord {
    pub id: i64,
    pub staging_file_id: i64,
    pub source_id: String,
    pub destination_id: String,
    pub destination_type: DestinationType,
    pub table_name: String,
    pub location: String,
    pub created_at: DateTime<Utc>,
}

/// A single staged record parsed out of a raw batch file, ready for
/// load-file generation (§4.8).
#[derive(Debug, Clone)]
pub struct StagedRecord {
    pub table: String,
    pub columns: TableSchema,
    pub data: serde_json::Map<String, serde_json::Value>,
    /// The record's `receivedAt` as carried in the job payload, or the
    /// worker's current time if the job never set one. Drives the
    /// `received_at` column the warehouse driver dedupes on.
    pub received_at: DateTime<Utc>,
}

pub fn new_upload_id_placeholder() -> Uuid {
    Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_stage_after_schema_update() {
        assert_eq!(UploadState::UpdatedSchema.resume_stage(), ResumeStage::ExportData);
        assert_eq!(UploadState::ExportingDataFailed.resume_stage(), ResumeStage::ExportData);
    }

    #[test]
    fn test_resume_stage_after_load_files_generated() {
        assert_eq!(UploadState::GeneratedLoadFile.resume_stage(), ResumeStage::UpdateSchema);
        assert_eq!(UploadState::UpdatingSchemaFailed.resume_stage(), ResumeStage::UpdateSchema);
    }

    #[test]
    fn test_resume_stage_default_is_generate() {
        assert_eq!(UploadState::GeneratingLoadFile.resume_stage(), ResumeStage::GenerateLoadFiles);
    }

    #[test]
    fn test_failed_variant_mapping() {
        assert_eq!(UploadState::GeneratingLoadFile.failed_variant(), UploadState::GeneratingLoadFileFailed);
        assert_eq!(UploadState::UpdatingSchema.failed_variant(), UploadState::UpdatingSchemaFailed);
        assert_eq!(UploadState::ExportingData.failed_variant(), UploadState::ExportingDataFailed);
    }

    #[test]
    fn test_terminal_states() {
        assert!(UploadState::ExportedData.is_terminal());
        assert!(UploadState::Aborted.is_terminal());
        assert!(!UploadState::UpdatedSchema.is_terminal());
    }
}
