//! Batch Router data model: jobs and job state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::DestinationType;

/// Lifecycle of a single job as it moves through the batch router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Executing,
    Succeeded,
    Failed,
    Aborted,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Executing => "executing",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Aborted => "aborted",
        }
    }
}

impl From<String> for JobState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "executing" => JobState::Executing,
            "succeeded" => JobState::Succeeded,
            "failed" => JobState::Failed,
            "aborted" => JobState::Aborted,
            _ => JobState::Waiting,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single unit of work owned by the external job queue. The payload is
/// opaque to the router except for the `messageId` field it uses for
/// crash-recovery dedup and, for warehouse-bound jobs, `metadata.table` /
/// `metadata.columns` / `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub source_id: String,
    pub destination_id: String,
    pub destination_type: DestinationType,
    pub payload: serde_json::Value,
    pub attempt_num: i32,
    pub state: JobState,
}

impl Job {
    /// The event id used for crash-recovery dedup. Jobs without one are
    /// never deduped — absence is not an invariant violation, just an
    /// untracked event.
    pub fn message_id(&self) -> Option<&str> {
        self.payload.get("messageId").and_then(|v| v.as_str())
    }

    /// `metadata.table`, required for warehouse-bound jobs.
    pub fn table(&self) -> Option<&str> {
        self.payload.pointer("/metadata/table").and_then(|v| v.as_str())
    }

    /// `metadata.columns`, a `name -> type` map, required for
    /// warehouse-bound jobs.
    pub fn columns(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.payload.pointer("/metadata/columns").and_then(|v| v.as_object())
    }

    /// `data`, the record's column values, required for warehouse-bound
    /// jobs.
    pub fn data(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.payload.get("data").and_then(|v| v.as_object())
    }
}

/// Outcome written back to the job queue after a batch resolves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusUpdate {
    pub job_id: Uuid,
    pub state: JobState,
    pub attempt_num: i32,
    pub response: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job(payload: serde_json::Value) -> Job {
        Job {
            job_id: Uuid::nil(),
            source_id: "src1".to_string(),
            destination_id: "dest1".to_string(),
            destination_type: DestinationType::S3,
            payload,
            attempt_num: 0,
            state: JobState::Waiting,
        }
    }

    #[test]
    fn test_job_state_round_trip() {
        for s in [
            JobState::Waiting,
            JobState::Executing,
            JobState::Succeeded,
            JobState::Failed,
            JobState::Aborted,
        ] {
            assert_eq!(JobState::from(s.as_str().to_string()), s);
        }
    }

    #[test]
    fn test_message_id_extraction() {
        let job = sample_job(serde_json::json!({"messageId": "abc-123"}));
        assert_eq!(job.message_id(), Some("abc-123"));
    }

    #[test]
    fn test_warehouse_fields_extraction() {
        let job = sample_job(serde_json::json!({
            "messageId": "abc-123",
            "metadata": {"table": "users", "columns": {"id": "int", "name": "string"}},
            "data": {"id": 1, "name": "alice"}
        }));
        assert_eq!(job.table(), Some("users"));
        assert_eq!(job.columns().unwrap().len(), 2);
        assert_eq!(job.data().unwrap().get("name").unwrap(), "alice");
    }

    #[test]
    fn test_missing_message_id_is_none_not_error() {
        let job = sample_job(serde_json::json!({"data": {}}));
        assert_eq!(job.message_id(), None);
    }
}
