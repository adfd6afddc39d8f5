//! Collaborator trait definitions for logicdeploy
//!
//! These traits define the narrow interfaces the pipeline consumes:
//! - `VersioningCenter`: releases, snapshots and version files
//! - `TagDatabase`: critical-tag registry per project
//! - `TargetRuntime`: the opaque industrial runtime being deployed to
//! - `PipelineStore`: persistence that reconstructs pipeline state after restart
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RuntimeError, StorageError};
use crate::model::{ContentDigest, CriticalTag, LogicFile, ReleaseRecord, Snapshot};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type for target runtime calls
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

// ---------------------------------------------------------------------------
// VersioningCenter / TagDatabase
// ---------------------------------------------------------------------------

/// Read-only view of project versions and promoted releases.
#[async_trait]
pub trait VersioningCenter: Send + Sync {
    /// All releases of a project, oldest first.
    async fn get_releases(&self, project_id: &str) -> StorageResult<Vec<ReleaseRecord>>;

    /// A single release by id.
    async fn get_release(&self, release_id: &str) -> StorageResult<ReleaseRecord>;

    /// The immutable snapshot a release points at.
    async fn get_snapshot(&self, snapshot_id: &str) -> StorageResult<Snapshot>;

    /// Files of a version, in snapshot order.
    async fn get_version_files(&self, version_id: &str) -> StorageResult<Vec<LogicFile>>;
}

/// Read-only registry of safety-relevant tags.
#[async_trait]
pub trait TagDatabase: Send + Sync {
    async fn get_critical_tags(&self, project_id: &str) -> StorageResult<Vec<CriticalTag>>;
}

// ---------------------------------------------------------------------------
// TargetRuntime
// ---------------------------------------------------------------------------

/// What a target runtime reports as currently running.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteState {
    /// Snapshot id of the active program, if any.
    pub active_snapshot: Option<String>,
    /// Per-chunk applied content, keyed by chunk id (file path).
    pub chunks: BTreeMap<String, ContentDigest>,
    /// Whether the controller is executing logic.
    pub running: bool,
}

/// A maintenance window during which quiesce/restart is permitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Whether plant operations signed off on the window.
    pub approved: bool,
}

impl MaintenanceWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.starts_at <= at && at < self.ends_at
    }
}

/// Lock and maintenance state of a target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeLock {
    /// Who currently holds the runtime lock (an engineering station, another deployment).
    pub holder: Option<String>,
    pub windows: Vec<MaintenanceWindow>,
}

impl RuntimeLock {
    /// The approved window covering `at`, if any.
    pub fn active_window(&self, at: DateTime<Utc>) -> Option<&MaintenanceWindow> {
        self.windows.iter().find(|w| w.approved && w.contains(at))
    }

    /// The earliest approved window that has not ended yet.
    pub fn next_window(&self, at: DateTime<Utc>) -> Option<&MaintenanceWindow> {
        self.windows
            .iter()
            .filter(|w| w.approved && w.ends_at > at)
            .min_by_key(|w| w.starts_at)
    }
}

/// One health observation from a target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    pub cpu_pct: f64,
    pub memory_pct: f64,
    /// Runtime faults reported since the previous sample.
    pub error_count: u32,
    /// Critical tags observed outside their permitted range since the previous sample.
    pub critical_tag_excursions: u32,
}

/// A snapshot uploaded to a target but not yet active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedArtifact {
    pub target: String,
    pub staging_ref: String,
    pub snapshot_id: String,
}

/// One independently applicable piece of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPayload {
    /// Chunk id, the logic file path.
    pub chunk_id: String,
    pub snapshot_id: String,
    pub digest: ContentDigest,
    pub content: String,
}

/// The external industrial runtime reached through deploy, rollback and
/// health-check calls. Every mutating call may time out; the caller must then
/// call [`TargetRuntime::query_state`] before deciding the outcome.
#[async_trait]
pub trait TargetRuntime: Send + Sync {
    async fn query_state(&self, target: &str) -> RuntimeResult<RemoteState>;

    async fn lock_status(&self, target: &str) -> RuntimeResult<RuntimeLock>;

    async fn upload(&self, target: &str, snapshot: &Snapshot) -> RuntimeResult<StagedArtifact>;

    async fn validate(&self, artifact: &StagedArtifact) -> RuntimeResult<()>;

    /// Atomically swap the staged artifact in as the active program.
    async fn activate(&self, artifact: &StagedArtifact) -> RuntimeResult<()>;

    async fn cleanup(&self, artifact: &StagedArtifact) -> RuntimeResult<()>;

    async fn apply_chunk(&self, target: &str, chunk: &ChunkPayload) -> RuntimeResult<()>;

    /// Bring the controller to a safe stop.
    async fn quiesce(&self, target: &str) -> RuntimeResult<()>;

    async fn restart(&self, target: &str) -> RuntimeResult<()>;

    /// Restore a previously captured state.
    async fn restore(&self, target: &str, state: &RemoteState) -> RuntimeResult<()>;

    async fn health(&self, target: &str) -> RuntimeResult<HealthSample>;
}

// ---------------------------------------------------------------------------
// PipelineStore: state reconstruction after restart
// ---------------------------------------------------------------------------

/// Kind of persisted pipeline record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Deployment,
    Checkpoint,
    Rollback,
    SafetyRun,
    ApprovalRound,
    AuditEntry,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deployment => "deployment",
            Self::Checkpoint => "checkpoint",
            Self::Rollback => "rollback",
            Self::SafetyRun => "safety_run",
            Self::ApprovalRound => "approval_round",
            Self::AuditEntry => "audit_entry",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A JSON document keyed by `(kind, id)` with a release index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRecord {
    pub kind: RecordKind,
    pub id: String,
    pub release_id: String,
    pub body: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl PipelineRecord {
    /// Serialize `value` into a record body.
    pub fn encode<T: Serialize>(
        kind: RecordKind,
        id: impl Into<String>,
        release_id: impl Into<String>,
        value: &T,
    ) -> StorageResult<Self> {
        Ok(Self {
            kind,
            id: id.into(),
            release_id: release_id.into(),
            body: serde_json::to_value(value)?,
            updated_at: Utc::now(),
        })
    }

    /// Deserialize the record body.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> StorageResult<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

/// Durable store of pipeline records.
///
/// Guarantees:
/// - `put` replaces any record with the same `(kind, id)`.
/// - `list` returns records ordered by id for deterministic recovery.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn put(&self, record: PipelineRecord) -> StorageResult<()>;

    async fn get(&self, kind: RecordKind, id: &str) -> StorageResult<Option<PipelineRecord>>;

    /// All records of `kind`, optionally restricted to one release.
    async fn list(
        &self,
        kind: RecordKind,
        release_id: Option<&str>,
    ) -> StorageResult<Vec<PipelineRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn maintenance_window_bounds() {
        let now = Utc::now();
        let w = MaintenanceWindow {
            starts_at: now,
            ends_at: now + Duration::hours(1),
            approved: true,
        };
        assert!(w.contains(now));
        assert!(!w.contains(now + Duration::hours(1)));
    }

    #[test]
    fn runtime_lock_ignores_unapproved_windows() {
        let now = Utc::now();
        let lock = RuntimeLock {
            holder: None,
            windows: vec![
                MaintenanceWindow {
                    starts_at: now - Duration::minutes(5),
                    ends_at: now + Duration::minutes(5),
                    approved: false,
                },
                MaintenanceWindow {
                    starts_at: now + Duration::minutes(30),
                    ends_at: now + Duration::minutes(90),
                    approved: true,
                },
            ],
        };
        assert!(lock.active_window(now).is_none());
        let next = lock.next_window(now).expect("next window");
        assert_eq!(next.starts_at, now + Duration::minutes(30));
    }

    #[test]
    fn pipeline_record_roundtrip() {
        let state = RemoteState {
            active_snapshot: Some("snap-1".into()),
            chunks: BTreeMap::new(),
            running: true,
        };
        let rec = PipelineRecord::encode(RecordKind::Checkpoint, "cp-1", "rel-1", &state).unwrap();
        let back: RemoteState = rec.decode().unwrap();
        assert_eq!(back, state);
        assert_eq!(rec.kind.to_string(), "checkpoint");
    }
}
