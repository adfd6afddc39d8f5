use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
    InProgress,
    Completed,
    Failed,
}

/// Restoration of a deployment's checkpoint. One record per deployment;
/// retries reuse it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rollback {
    pub id: String,
    pub deployment_id: String,
    pub checkpoint_id: String,
    pub initiated_by: String,
    pub reason: String,
    pub status: RollbackStatus,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}
