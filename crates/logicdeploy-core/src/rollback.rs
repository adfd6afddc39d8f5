//! Checkpoints and rollback.
//!
//! A checkpoint captures every target's remote state before the first
//! mutating call of a deployment. Rolling back restores that state. There is
//! one rollback record per deployment: a completed rollback is returned
//! unchanged, a failed one is retried on the same record.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use logicdeploy_state::{PipelineRecord, PipelineStore, RecordKind, TargetRuntime};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{RetentionConfig, RuntimeConfig};
use crate::domain::{
    Checkpoint, Deployment, DeploymentStatus, PipelineError, PipelineResult, Rollback,
    RollbackStatus,
};
use crate::metrics::METRICS;
use crate::obs;
use crate::orchestrator::calls::RuntimeCalls;

#[derive(Default)]
struct Records {
    checkpoints: HashMap<String, Checkpoint>,
    /// deployment id -> rollback
    rollbacks: HashMap<String, Rollback>,
}

pub struct CheckpointManager {
    runtime: Arc<dyn TargetRuntime>,
    store: Arc<dyn PipelineStore>,
    runtime_config: RuntimeConfig,
    retention: RetentionConfig,
    records: Mutex<Records>,
}

impl CheckpointManager {
    pub fn new(
        runtime: Arc<dyn TargetRuntime>,
        store: Arc<dyn PipelineStore>,
        runtime_config: RuntimeConfig,
        retention: RetentionConfig,
    ) -> Self {
        Self {
            runtime,
            store,
            runtime_config,
            retention,
            records: Mutex::new(Records::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn persist_checkpoint(&self, checkpoint: &Checkpoint) -> PipelineResult<()> {
        let record = PipelineRecord::encode(
            RecordKind::Checkpoint,
            checkpoint.id.clone(),
            checkpoint.release_id.clone(),
            checkpoint,
        )?;
        self.store.put(record).await?;
        Ok(())
    }

    async fn persist_rollback(&self, rollback: &Rollback, release_id: &str) -> PipelineResult<()> {
        let record = PipelineRecord::encode(
            RecordKind::Rollback,
            rollback.id.clone(),
            release_id,
            rollback,
        )?;
        self.store.put(record).await?;
        Ok(())
    }

    /// Capture the remote state of every target of `deployment`.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::CheckpointFailed` naming the first target that
    /// could not be queried. Nothing is stored in that case.
    pub async fn create_checkpoint(
        &self,
        deployment: &Deployment,
        now: DateTime<Utc>,
    ) -> PipelineResult<Checkpoint> {
        let calls = RuntimeCalls::new(self.runtime.as_ref(), &self.runtime_config);
        let mut captured_state = BTreeMap::new();
        for target in &deployment.targets {
            let state = calls
                .query_state(target)
                .await
                .map_err(|e| PipelineError::CheckpointFailed {
                    target: target.clone(),
                    reason: e.to_string(),
                })?;
            captured_state.insert(target.clone(), state);
        }

        let checkpoint = Checkpoint {
            id: Uuid::new_v4().to_string(),
            deployment_id: deployment.id.clone(),
            release_id: deployment.release_id.clone(),
            captured_state,
            captured_at: now,
            expires_at: None,
            pruned_at: None,
        };
        self.persist_checkpoint(&checkpoint).await?;
        self.lock()
            .checkpoints
            .insert(checkpoint.id.clone(), checkpoint.clone());
        info!(
            deployment_id = %deployment.id,
            checkpoint_id = %checkpoint.id,
            targets = checkpoint.captured_state.len(),
            "checkpoint captured"
        );
        Ok(checkpoint)
    }

    pub fn checkpoint(&self, checkpoint_id: &str) -> Option<Checkpoint> {
        self.lock().checkpoints.get(checkpoint_id).cloned()
    }

    pub fn rollback_for(&self, deployment_id: &str) -> Option<Rollback> {
        self.lock().rollbacks.get(deployment_id).cloned()
    }

    /// Start the retention period of a finished deployment's checkpoint.
    pub async fn mark_retained(
        &self,
        checkpoint_id: &str,
        finished_at: DateTime<Utc>,
    ) -> PipelineResult<()> {
        let retain = Duration::seconds(self.retention.retain_for_secs as i64);
        let updated = {
            let mut records = self.lock();
            records.checkpoints.get_mut(checkpoint_id).map(|cp| {
                cp.expires_at = Some(finished_at + retain);
                cp.clone()
            })
        };
        if let Some(cp) = updated {
            self.persist_checkpoint(&cp).await?;
        }
        Ok(())
    }

    /// Whether an operator may roll `deployment` back at `now`.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::RollbackUnavailable` with the reason.
    pub fn can_rollback(&self, deployment: &Deployment, now: DateTime<Utc>) -> PipelineResult<()> {
        let unavailable = |reason: &str| PipelineError::RollbackUnavailable {
            deployment_id: deployment.id.clone(),
            reason: reason.to_string(),
        };
        match deployment.status {
            DeploymentStatus::Completed | DeploymentStatus::Failed | DeploymentStatus::Cancelled => {}
            DeploymentStatus::Deploying | DeploymentStatus::Paused => {
                return Err(unavailable("deployment is still running; cancel it instead"))
            }
            _ => return Err(unavailable("nothing was deployed")),
        }
        self.usable_checkpoint(deployment, now).map(|_| ())
    }

    fn usable_checkpoint(&self, deployment: &Deployment, now: DateTime<Utc>) -> PipelineResult<Checkpoint> {
        let unavailable = |reason: &str| PipelineError::RollbackUnavailable {
            deployment_id: deployment.id.clone(),
            reason: reason.to_string(),
        };
        let checkpoint_id = deployment
            .checkpoint_id
            .as_deref()
            .ok_or_else(|| unavailable("no checkpoint was captured"))?;
        let checkpoint = self
            .checkpoint(checkpoint_id)
            .ok_or_else(|| unavailable("checkpoint record is missing"))?;
        if !checkpoint.is_usable() || checkpoint.is_expired_at(now) {
            return Err(unavailable("checkpoint retention has expired"));
        }
        Ok(checkpoint)
    }

    /// Restore the checkpoint of `deployment` on every target.
    ///
    /// Status is not checked here; the orchestrator also rolls back running
    /// deployments on failure and cancel.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::RollbackUnavailable` if no usable checkpoint exists.
    /// Returns `PipelineError::RollbackFailed` if any target could not be
    /// restored; the record stays `failed` and a later call retries it.
    pub async fn rollback(
        &self,
        deployment: &Deployment,
        initiated_by: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> PipelineResult<Rollback> {
        if let Some(existing) = self.rollback_for(&deployment.id) {
            if existing.status == RollbackStatus::Completed {
                info!(deployment_id = %deployment.id, rollback_id = %existing.id, "rollback already completed");
                return Ok(existing);
            }
        }
        let checkpoint = self.usable_checkpoint(deployment, now)?;

        let mut rollback = match self.rollback_for(&deployment.id) {
            Some(mut retry) => {
                retry.attempts += 1;
                retry.status = RollbackStatus::InProgress;
                retry.last_error = None;
                retry
            }
            None => Rollback {
                id: Uuid::new_v4().to_string(),
                deployment_id: deployment.id.clone(),
                checkpoint_id: checkpoint.id.clone(),
                initiated_by: initiated_by.to_string(),
                reason: reason.to_string(),
                status: RollbackStatus::InProgress,
                attempts: 1,
                started_at: now,
                finished_at: None,
                last_error: None,
            },
        };
        self.store_rollback(&rollback, &deployment.release_id).await?;
        METRICS.inc_rollbacks();
        warn!(
            deployment_id = %deployment.id,
            rollback_id = %rollback.id,
            attempt = rollback.attempts,
            initiated_by = %initiated_by,
            reason = %reason,
            "rolling back"
        );

        let calls = RuntimeCalls::new(self.runtime.as_ref(), &self.runtime_config);
        let mut failures = Vec::new();
        for (target, state) in &checkpoint.captured_state {
            let expected = state.clone();
            let result = calls
                .mutate(
                    target,
                    "restore",
                    self.runtime.restore(target, state),
                    move |s| *s == expected,
                )
                .await;
            if let Err(e) = result {
                error!(target_id = %target, error = %e, "restore failed");
                failures.push(format!("{target}: {e}"));
            }
        }

        rollback.finished_at = Some(now);
        if failures.is_empty() {
            rollback.status = RollbackStatus::Completed;
        } else {
            rollback.status = RollbackStatus::Failed;
            rollback.last_error = Some(failures.join("; "));
        }
        self.store_rollback(&rollback, &deployment.release_id).await?;
        obs::emit_rollback(&deployment.id, &rollback.id, rollback.status, rollback.attempts);

        match rollback.status {
            RollbackStatus::Completed => Ok(rollback),
            _ => Err(PipelineError::RollbackFailed {
                deployment_id: deployment.id.clone(),
                reason: failures.join("; "),
            }),
        }
    }

    async fn store_rollback(&self, rollback: &Rollback, release_id: &str) -> PipelineResult<()> {
        self.lock()
            .rollbacks
            .insert(rollback.deployment_id.clone(), rollback.clone());
        self.persist_rollback(rollback, release_id).await
    }

    /// Discard captured state of checkpoints past retention.
    pub async fn prune_expired(&self, now: DateTime<Utc>) -> PipelineResult<Vec<String>> {
        let pruned: Vec<Checkpoint> = {
            let mut records = self.lock();
            records
                .checkpoints
                .values_mut()
                .filter(|cp| cp.is_usable() && cp.is_expired_at(now))
                .map(|cp| {
                    cp.pruned_at = Some(now);
                    cp.captured_state.clear();
                    cp.clone()
                })
                .collect()
        };
        for cp in &pruned {
            self.persist_checkpoint(cp).await?;
            info!(checkpoint_id = %cp.id, deployment_id = %cp.deployment_id, "checkpoint pruned");
        }
        let mut ids: Vec<String> = pruned.into_iter().map(|cp| cp.id).collect();
        ids.sort();
        Ok(ids)
    }

    /// Reload checkpoints and rollbacks from the store.
    pub async fn load(&self) -> PipelineResult<usize> {
        let checkpoints = self.store.list(RecordKind::Checkpoint, None).await?;
        let rollbacks = self.store.list(RecordKind::Rollback, None).await?;
        let mut records = self.lock();
        for record in &checkpoints {
            let cp: Checkpoint = record.decode()?;
            records.checkpoints.insert(cp.id.clone(), cp);
        }
        for record in &rollbacks {
            let rb: Rollback = record.decode()?;
            records.rollbacks.insert(rb.deployment_id.clone(), rb);
        }
        Ok(checkpoints.len() + rollbacks.len())
    }
}
