//! In-memory fakes for collaborator traits (testing only)
//!
//! Provides `MemoryVersioningCenter`, `MemoryTagDatabase`, `MemoryPipelineStore`
//! and a scriptable `MemoryTargetRuntime` that satisfy the trait contracts
//! without any external dependencies.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{RuntimeError, StorageError};
use crate::model::{CriticalTag, LogicFile, ReleaseRecord, Snapshot};
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryVersioningCenter
// ---------------------------------------------------------------------------

/// In-memory versioning center keyed by release and snapshot id.
#[derive(Debug, Default)]
pub struct MemoryVersioningCenter {
    releases: Mutex<HashMap<String, ReleaseRecord>>,
    snapshots: Mutex<HashMap<String, Snapshot>>,
}

impl MemoryVersioningCenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_release(&self, release: ReleaseRecord) {
        self.releases
            .lock()
            .unwrap()
            .insert(release.release_id.clone(), release);
    }

    /// Register a snapshot; its files become the files of `snapshot.version_id`.
    pub fn insert_snapshot(&self, snapshot: Snapshot) {
        self.snapshots
            .lock()
            .unwrap()
            .insert(snapshot.snapshot_id.clone(), snapshot);
    }
}

#[async_trait]
impl VersioningCenter for MemoryVersioningCenter {
    async fn get_releases(&self, project_id: &str) -> StorageResult<Vec<ReleaseRecord>> {
        let releases = self.releases.lock().unwrap();
        let mut out: Vec<ReleaseRecord> = releases
            .values()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.release_id.cmp(&b.release_id))
        });
        Ok(out)
    }

    async fn get_release(&self, release_id: &str) -> StorageResult<ReleaseRecord> {
        self.releases
            .lock()
            .unwrap()
            .get(release_id)
            .cloned()
            .ok_or_else(|| StorageError::ReleaseNotFound {
                release_id: release_id.to_string(),
            })
    }

    async fn get_snapshot(&self, snapshot_id: &str) -> StorageResult<Snapshot> {
        self.snapshots
            .lock()
            .unwrap()
            .get(snapshot_id)
            .cloned()
            .ok_or_else(|| StorageError::SnapshotNotFound {
                snapshot_id: snapshot_id.to_string(),
            })
    }

    async fn get_version_files(&self, version_id: &str) -> StorageResult<Vec<LogicFile>> {
        self.snapshots
            .lock()
            .unwrap()
            .values()
            .find(|s| s.version_id == version_id)
            .map(|s| s.files.clone())
            .ok_or_else(|| StorageError::VersionNotFound {
                version_id: version_id.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// MemoryTagDatabase
// ---------------------------------------------------------------------------

/// In-memory tag registry. Unknown projects have no critical tags.
#[derive(Debug, Default)]
pub struct MemoryTagDatabase {
    tags: Mutex<HashMap<String, Vec<CriticalTag>>>,
}

impl MemoryTagDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tags(&self, project_id: &str, tags: Vec<CriticalTag>) {
        self.tags
            .lock()
            .unwrap()
            .insert(project_id.to_string(), tags);
    }
}

#[async_trait]
impl TagDatabase for MemoryTagDatabase {
    async fn get_critical_tags(&self, project_id: &str) -> StorageResult<Vec<CriticalTag>> {
        Ok(self
            .tags
            .lock()
            .unwrap()
            .get(project_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// MemoryPipelineStore
// ---------------------------------------------------------------------------

/// In-memory pipeline store backed by a `BTreeMap<(kind, id), record>`.
#[derive(Debug, Default)]
pub struct MemoryPipelineStore {
    records: Mutex<BTreeMap<(RecordKind, String), PipelineRecord>>,
    fail_writes: Mutex<bool>,
}

impl MemoryPipelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` fail with a backend error.
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap() = fail;
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PipelineStore for MemoryPipelineStore {
    async fn put(&self, record: PipelineRecord) -> StorageResult<()> {
        if *self.fail_writes.lock().unwrap() {
            return Err(StorageError::Backend("write rejected".to_string()));
        }
        self.records
            .lock()
            .unwrap()
            .insert((record.kind, record.id.clone()), record);
        Ok(())
    }

    async fn get(&self, kind: RecordKind, id: &str) -> StorageResult<Option<PipelineRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(kind, id.to_string()))
            .cloned())
    }

    async fn list(
        &self,
        kind: RecordKind,
        release_id: Option<&str>,
    ) -> StorageResult<Vec<PipelineRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records
            .values()
            .filter(|r| r.kind == kind)
            .filter(|r| release_id.map_or(true, |rid| r.release_id == rid))
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryTargetRuntime
// ---------------------------------------------------------------------------

/// Scripted misbehaviour for one runtime call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeFault {
    /// The call times out. With `applied` the effect still lands on the target.
    Timeout { applied: bool },
    /// The target refuses the call.
    Reject(String),
    /// The link drops before the call reaches the target.
    Disconnect,
}

/// One call observed by the fake, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeCall {
    pub target: String,
    pub operation: &'static str,
}

#[derive(Debug, Default)]
struct TargetSim {
    state: RemoteState,
    lock: RuntimeLock,
    staged: HashMap<String, Snapshot>,
    health: VecDeque<RuntimeResult<HealthSample>>,
    steady_health: HealthSample,
}

#[derive(Debug, Default)]
struct RuntimeInner {
    targets: HashMap<String, TargetSim>,
    faults: HashMap<(String, &'static str), VecDeque<RuntimeFault>>,
    calls: Vec<RuntimeCall>,
    next_ref: u64,
}

/// In-memory target runtime whose faults, latency and health readings are scripted.
///
/// Faults are queued per `(target, operation)` and consumed one per call.
#[derive(Debug, Default)]
pub struct MemoryTargetRuntime {
    inner: Mutex<RuntimeInner>,
    latency: Mutex<Duration>,
}

impl MemoryTargetRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a target with an initial remote state.
    pub fn add_target(&self, target: &str, state: RemoteState) {
        let mut inner = self.inner.lock().unwrap();
        inner.targets.insert(
            target.to_string(),
            TargetSim {
                state,
                ..TargetSim::default()
            },
        );
    }

    /// Queue a fault for the next `operation` call on `target`.
    pub fn script_fault(&self, target: &str, operation: &'static str, fault: RuntimeFault) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .faults
            .entry((target.to_string(), operation))
            .or_default()
            .push_back(fault);
    }

    /// Queue one health reading; readings are consumed before the steady value.
    pub fn push_health(&self, target: &str, sample: RuntimeResult<HealthSample>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(sim) = inner.targets.get_mut(target) {
            sim.health.push_back(sample);
        }
    }

    /// Reading returned once the scripted queue is drained.
    pub fn set_steady_health(&self, target: &str, sample: HealthSample) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(sim) = inner.targets.get_mut(target) {
            sim.steady_health = sample;
        }
    }

    pub fn set_lock(&self, target: &str, lock: RuntimeLock) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(sim) = inner.targets.get_mut(target) {
            sim.lock = lock;
        }
    }

    /// Delay applied before every mutating call.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Current remote state of a target.
    pub fn state(&self, target: &str) -> Option<RemoteState> {
        let inner = self.inner.lock().unwrap();
        inner.targets.get(target).map(|sim| sim.state.clone())
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Number of calls of `operation` across all targets.
    pub fn call_count(&self, operation: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    async fn delay(&self) {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// Record the call, consume a scripted fault and run `effect` when the
    /// call reaches the target.
    fn invoke<T>(
        &self,
        target: &str,
        operation: &'static str,
        effect: impl FnOnce(&mut TargetSim, &mut u64) -> RuntimeResult<T>,
    ) -> RuntimeResult<T> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(RuntimeCall {
            target: target.to_string(),
            operation,
        });
        let fault = inner
            .faults
            .get_mut(&(target.to_string(), operation))
            .and_then(VecDeque::pop_front);

        let RuntimeInner {
            targets, next_ref, ..
        } = &mut *inner;
        let sim = targets
            .get_mut(target)
            .ok_or_else(|| RuntimeError::UnknownTarget {
                target: target.to_string(),
            })?;

        match fault {
            None => effect(sim, next_ref),
            Some(RuntimeFault::Timeout { applied }) => {
                if applied {
                    effect(sim, next_ref)?;
                }
                Err(RuntimeError::Timeout {
                    target: target.to_string(),
                    operation: operation.to_string(),
                    timeout_ms: 0,
                })
            }
            Some(RuntimeFault::Reject(reason)) => Err(RuntimeError::Rejected {
                target: target.to_string(),
                operation: operation.to_string(),
                reason,
            }),
            Some(RuntimeFault::Disconnect) => Err(RuntimeError::Communication {
                target: target.to_string(),
                detail: "link down".to_string(),
            }),
        }
    }
}

fn chunk_map(snapshot: &Snapshot) -> BTreeMap<String, crate::model::ContentDigest> {
    snapshot
        .files
        .iter()
        .map(|f| {
            (
                f.path.clone(),
                crate::model::ContentDigest::from_bytes(f.content.as_bytes()),
            )
        })
        .collect()
}

#[async_trait]
impl TargetRuntime for MemoryTargetRuntime {
    async fn query_state(&self, target: &str) -> RuntimeResult<RemoteState> {
        self.invoke(target, "query_state", |sim, _| Ok(sim.state.clone()))
    }

    async fn lock_status(&self, target: &str) -> RuntimeResult<RuntimeLock> {
        self.invoke(target, "lock_status", |sim, _| Ok(sim.lock.clone()))
    }

    async fn upload(&self, target: &str, snapshot: &Snapshot) -> RuntimeResult<StagedArtifact> {
        self.delay().await;
        let owned = snapshot.clone();
        self.invoke(target, "upload", move |sim, next_ref| {
            *next_ref += 1;
            let staging_ref = format!("stage-{next_ref}");
            let artifact = StagedArtifact {
                target: target.to_string(),
                staging_ref: staging_ref.clone(),
                snapshot_id: owned.snapshot_id.clone(),
            };
            sim.staged.insert(staging_ref, owned);
            Ok(artifact)
        })
    }

    async fn validate(&self, artifact: &StagedArtifact) -> RuntimeResult<()> {
        self.delay().await;
        self.invoke(&artifact.target, "validate", |sim, _| {
            if sim.staged.contains_key(&artifact.staging_ref) {
                Ok(())
            } else {
                Err(RuntimeError::Rejected {
                    target: artifact.target.clone(),
                    operation: "validate".to_string(),
                    reason: format!("no staged artifact {}", artifact.staging_ref),
                })
            }
        })
    }

    async fn activate(&self, artifact: &StagedArtifact) -> RuntimeResult<()> {
        self.delay().await;
        self.invoke(&artifact.target, "activate", |sim, _| {
            let snapshot = sim.staged.get(&artifact.staging_ref).ok_or_else(|| {
                RuntimeError::Rejected {
                    target: artifact.target.clone(),
                    operation: "activate".to_string(),
                    reason: format!("no staged artifact {}", artifact.staging_ref),
                }
            })?;
            sim.state = RemoteState {
                active_snapshot: Some(snapshot.snapshot_id.clone()),
                chunks: chunk_map(snapshot),
                running: true,
            };
            Ok(())
        })
    }

    async fn cleanup(&self, artifact: &StagedArtifact) -> RuntimeResult<()> {
        self.invoke(&artifact.target, "cleanup", |sim, _| {
            sim.staged.remove(&artifact.staging_ref);
            Ok(())
        })
    }

    async fn apply_chunk(&self, target: &str, chunk: &ChunkPayload) -> RuntimeResult<()> {
        self.delay().await;
        self.invoke(target, "apply_chunk", |sim, _| {
            sim.state
                .chunks
                .insert(chunk.chunk_id.clone(), chunk.digest.clone());
            sim.state.active_snapshot = Some(chunk.snapshot_id.clone());
            Ok(())
        })
    }

    async fn quiesce(&self, target: &str) -> RuntimeResult<()> {
        self.delay().await;
        self.invoke(target, "quiesce", |sim, _| {
            sim.state.running = false;
            Ok(())
        })
    }

    async fn restart(&self, target: &str) -> RuntimeResult<()> {
        self.delay().await;
        self.invoke(target, "restart", |sim, _| {
            sim.state.running = true;
            Ok(())
        })
    }

    async fn restore(&self, target: &str, state: &RemoteState) -> RuntimeResult<()> {
        self.delay().await;
        self.invoke(target, "restore", |sim, _| {
            sim.state = state.clone();
            Ok(())
        })
    }

    async fn health(&self, target: &str) -> RuntimeResult<HealthSample> {
        self.invoke(target, "health", |sim, _| {
            sim.health.pop_front().unwrap_or(Ok(sim.steady_health))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VendorDialect;
    use chrono::Utc;

    fn snapshot(id: &str) -> Snapshot {
        Snapshot::new(
            id,
            format!("v-{id}"),
            vec![LogicFile::new(
                "main.st",
                VendorDialect::Iec61131,
                "PROGRAM Main END_PROGRAM",
                Utc::now(),
            )],
        )
    }

    #[tokio::test]
    async fn activate_replaces_remote_state() {
        let rt = MemoryTargetRuntime::new();
        rt.add_target("plc-1", RemoteState::default());
        let art = rt.upload("plc-1", &snapshot("s1")).await.unwrap();
        rt.validate(&art).await.unwrap();
        rt.activate(&art).await.unwrap();

        let state = rt.state("plc-1").unwrap();
        assert_eq!(state.active_snapshot.as_deref(), Some("s1"));
        assert!(state.running);
        assert!(state.chunks.contains_key("main.st"));
    }

    #[tokio::test]
    async fn applied_timeout_still_changes_state() {
        let rt = MemoryTargetRuntime::new();
        rt.add_target("plc-1", RemoteState::default());
        let art = rt.upload("plc-1", &snapshot("s1")).await.unwrap();
        rt.script_fault("plc-1", "activate", RuntimeFault::Timeout { applied: true });

        let err = rt.activate(&art).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(
            rt.query_state("plc-1").await.unwrap().active_snapshot.as_deref(),
            Some("s1")
        );
    }

    #[tokio::test]
    async fn faults_are_consumed_once() {
        let rt = MemoryTargetRuntime::new();
        rt.add_target("plc-1", RemoteState::default());
        rt.script_fault("plc-1", "quiesce", RuntimeFault::Disconnect);

        assert!(rt.quiesce("plc-1").await.is_err());
        assert!(rt.quiesce("plc-1").await.is_ok());
        assert_eq!(rt.call_count("quiesce"), 2);
    }

    #[tokio::test]
    async fn unknown_target_is_reported() {
        let rt = MemoryTargetRuntime::new();
        let err = rt.query_state("ghost").await.unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownTarget { .. }));
    }

    #[tokio::test]
    async fn scripted_health_precedes_steady_reading() {
        let rt = MemoryTargetRuntime::new();
        rt.add_target("plc-1", RemoteState::default());
        rt.set_steady_health(
            "plc-1",
            HealthSample {
                cpu_pct: 10.0,
                ..HealthSample::default()
            },
        );
        rt.push_health(
            "plc-1",
            Ok(HealthSample {
                cpu_pct: 99.0,
                ..HealthSample::default()
            }),
        );

        assert_eq!(rt.health("plc-1").await.unwrap().cpu_pct, 99.0);
        assert_eq!(rt.health("plc-1").await.unwrap().cpu_pct, 10.0);
    }
}
