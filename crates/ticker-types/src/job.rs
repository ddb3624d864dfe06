// ABOUTME: Job record types tracking one long-running generation request.
// ABOUTME: Mirrors the backend's job row contract consumed by the client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a generation job.
///
/// Transitions pending -> processing -> {completed | failed}, with the
/// terminal edge taken exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// True once no further meaningful transitions can occur.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One entry in a job's tool-call ledger.
///
/// The ledger arrives as a full-array snapshot on every job update, never
/// as a diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
}

/// Opaque result payload of a completed job.
///
/// The backend guarantees at least a reference to the produced message;
/// anything else rides along untyped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Server-side record tracking one generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub chat_id: String,
    pub user_message: String,
    pub status: JobStatus,
    #[serde(default)]
    pub result: Option<JobResult>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}
