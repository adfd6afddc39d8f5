//! The deployment service: one entry point per operator action.
//!
//! Every mutating entry point takes the release's guard from
//! [`ReleaseLocks`]. A running rollout drops the guard while it waits on
//! target runtimes and takes it again for each log line, progress update
//! and state change.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use logicdeploy_safety::{
    extract, CheckContext, CheckUpdate, ExtractedFacts, SafetyPipeline, SafetyRun, TargetProfile,
};
use logicdeploy_state::{
    PipelineRecord, PipelineStore, RecordKind, ReleaseRecord, Snapshot, StorageError,
    TagDatabase, TargetRuntime, VersioningCenter,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::approvals::{ApprovalDecision, ApprovalManager, Approver, DeployApproval};
use crate::config::PipelineConfig;
use crate::domain::{
    Deployment, DeploymentFailure, DeploymentStatus, LogLevel, PipelineError, PipelineResult,
    Rollback, StartRequest, StrategyKind,
};
use crate::metrics::METRICS;
use crate::monitor::{rounds_for, HealthMonitor, MonitorOutcome};
use crate::obs;
use crate::orchestrator::calls::RuntimeCalls;
use crate::orchestrator::clock::{Clock, SystemClock};
use crate::orchestrator::control::{ControlSignal, DeploymentControl};
use crate::orchestrator::events::{DeploymentEvent, EventBus};
use crate::orchestrator::locks::ReleaseLocks;
use crate::orchestrator::machine::{guard_checkpoint, guard_checks, guard_quorum, transition};
use crate::orchestrator::strategy::{create_strategy, Rollout, RolloutError, RolloutObserver};
use crate::rollback::CheckpointManager;

/// External systems the service talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub versioning: Arc<dyn VersioningCenter>,
    pub tags: Arc<dyn TagDatabase>,
    pub runtime: Arc<dyn TargetRuntime>,
    pub store: Arc<dyn PipelineStore>,
}

#[derive(Default)]
struct Registry {
    deployments: HashMap<String, Deployment>,
    /// release id -> its non-terminal deployment
    active: HashMap<String, String>,
    /// Controls of rollouts currently executing in this process.
    controls: HashMap<String, Arc<DeploymentControl>>,
}

pub struct DeploymentService {
    versioning: Arc<dyn VersioningCenter>,
    tags: Arc<dyn TagDatabase>,
    runtime: Arc<dyn TargetRuntime>,
    store: Arc<dyn PipelineStore>,
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    pipeline: SafetyPipeline,
    approvals: ApprovalManager,
    checkpoints: CheckpointManager,
    locks: ReleaseLocks,
    events: EventBus,
    registry: Mutex<Registry>,
}

fn failure_of(err: &PipelineError) -> DeploymentFailure {
    DeploymentFailure {
        reason: err.to_string(),
        remediation: err.remediation(),
    }
}

impl DeploymentService {
    pub fn new(collaborators: Collaborators, config: PipelineConfig) -> Self {
        let Collaborators {
            versioning,
            tags,
            runtime,
            store,
        } = collaborators;
        Self {
            approvals: ApprovalManager::new(config.approval.clone(), store.clone()),
            checkpoints: CheckpointManager::new(
                runtime.clone(),
                store.clone(),
                config.runtime.clone(),
                config.retention.clone(),
            ),
            versioning,
            tags,
            runtime,
            store,
            config,
            clock: Arc::new(SystemClock),
            pipeline: SafetyPipeline::standard(),
            locks: ReleaseLocks::new(),
            events: EventBus::new(),
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn approvals(&self) -> &ApprovalManager {
        &self.approvals
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn control(&self, deployment_id: &str) -> Option<Arc<DeploymentControl>> {
        self.registry().controls.get(deployment_id).cloned()
    }

    /// Current state of a deployment. Pure read.
    pub fn get_deployment(&self, deployment_id: &str) -> PipelineResult<Deployment> {
        self.registry()
            .deployments
            .get(deployment_id)
            .cloned()
            .ok_or_else(|| PipelineError::DeploymentNotFound(deployment_id.to_string()))
    }

    /// The release's non-terminal deployment, if any.
    pub fn active_deployment(&self, release_id: &str) -> Option<Deployment> {
        let registry = self.registry();
        registry
            .active
            .get(release_id)
            .and_then(|id| registry.deployments.get(id))
            .cloned()
    }

    pub fn subscribe(&self, deployment_id: &str) -> broadcast::Receiver<DeploymentEvent> {
        self.events.subscribe(deployment_id)
    }

    /// Store, index and publish a deployment.
    async fn save(&self, deployment: &Deployment) -> PipelineResult<()> {
        {
            let mut registry = self.registry();
            if deployment.is_active() {
                registry
                    .active
                    .insert(deployment.release_id.clone(), deployment.id.clone());
            } else if registry.active.get(&deployment.release_id) == Some(&deployment.id) {
                registry.active.remove(&deployment.release_id);
            }
            registry
                .deployments
                .insert(deployment.id.clone(), deployment.clone());
        }

        let record = PipelineRecord::encode(
            RecordKind::Deployment,
            deployment.id.clone(),
            deployment.release_id.clone(),
            deployment,
        )?;
        self.store.put(record).await?;

        self.events.publish(DeploymentEvent {
            deployment_id: deployment.id.clone(),
            status: deployment.status,
            percent: deployment.percent,
            entry: deployment.progress_log.last().cloned(),
        });
        if !deployment.is_active() && deployment.status != DeploymentStatus::Completed {
            self.events.close(&deployment.id);
        }
        Ok(())
    }

    /// Apply `f` to the stored deployment and save it.
    async fn update<F>(&self, deployment_id: &str, f: F) -> PipelineResult<Deployment>
    where
        F: FnOnce(&mut Deployment, DateTime<Utc>) + Send,
    {
        let mut deployment = self.get_deployment(deployment_id)?;
        f(&mut deployment, self.now());
        self.save(&deployment).await?;
        Ok(deployment)
    }

    async fn load_snapshot(&self, release_id: &str) -> PipelineResult<(Snapshot, ExtractedFacts)> {
        let release = self.release(release_id).await?;
        let snapshot = self.versioning.get_snapshot(&release.snapshot_id).await?;
        let facts = extract(&snapshot);
        Ok((snapshot, facts))
    }

    async fn release(&self, release_id: &str) -> PipelineResult<ReleaseRecord> {
        self.versioning
            .get_release(release_id)
            .await
            .map_err(|e| match e {
                StorageError::ReleaseNotFound { .. } => {
                    PipelineError::ReleaseNotFound(release_id.to_string())
                }
                other => other.into(),
            })
    }

    /// Queue a deployment of a release.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::ReleaseNotFound` for an unknown release.
    /// Returns `PipelineError::ActiveDeploymentExists` if the release already
    /// has a non-terminal deployment.
    /// Returns `PipelineError::InvalidPlan` if there is no target to deploy to.
    pub async fn start_deployment(&self, request: StartRequest) -> PipelineResult<Deployment> {
        let release = self.release(&request.release_id).await?;
        let _guard = self.locks.acquire(&release.release_id).await;

        if let Some(active) = self.active_deployment(&release.release_id) {
            return Err(PipelineError::ActiveDeploymentExists {
                release_id: release.release_id.clone(),
                deployment_id: active.id,
            });
        }

        let mut targets = request
            .targets
            .clone()
            .unwrap_or_else(|| release.metadata.target_runtimes.clone());
        let mut seen = HashSet::new();
        targets.retain(|t| seen.insert(t.clone()));
        if targets.is_empty() {
            return Err(PipelineError::InvalidPlan(format!(
                "release {} has no target runtimes",
                release.release_id
            )));
        }

        let now = self.now();
        let mut deployment = Deployment::new(Uuid::new_v4().to_string(), &request, targets, now);
        deployment.log(
            LogLevel::Info,
            None,
            format!(
                "{} rollout of release {} to {} target(s) requested by {}",
                deployment.strategy,
                deployment.release_id,
                deployment.targets.len(),
                deployment.requested_by
            ),
            now,
        );
        self.save(&deployment).await?;
        METRICS.inc_deployments_started();
        info!(
            deployment_id = %deployment.id,
            release_id = %deployment.release_id,
            strategy = %deployment.strategy,
            "deployment queued"
        );
        Ok(deployment)
    }

    /// Run the safety checks for a release.
    ///
    /// Targets and strategy come from the release's active deployment when
    /// there is one, otherwise from the release itself.
    pub async fn run_safety_checks(
        &self,
        release_id: &str,
        updates: Option<&mpsc::Sender<CheckUpdate>>,
    ) -> PipelineResult<SafetyRun> {
        let release = self.release(release_id).await?;
        let (strategy, targets) = match self.active_deployment(release_id) {
            Some(d) => (d.strategy, d.targets),
            None => (StrategyKind::Atomic, release.metadata.target_runtimes.clone()),
        };
        let (run, _) = self
            .evaluate_release(&release, strategy, &targets, updates)
            .await?;
        Ok(run)
    }

    async fn evaluate_release(
        &self,
        release: &ReleaseRecord,
        strategy: StrategyKind,
        targets: &[String],
        updates: Option<&mpsc::Sender<CheckUpdate>>,
    ) -> PipelineResult<(SafetyRun, ExtractedFacts)> {
        let snapshot = self.versioning.get_snapshot(&release.snapshot_id).await?;
        let facts = extract(&snapshot);
        let critical_tags = self.tags.get_critical_tags(&release.project_id).await?;

        let calls = RuntimeCalls::new(self.runtime.as_ref(), &self.config.runtime);
        let mut profiles = Vec::with_capacity(targets.len());
        for target in targets {
            let lock = calls
                .call(target, "lock_status", self.runtime.lock_status(target))
                .await?;
            profiles.push(TargetProfile {
                target_id: target.clone(),
                supported_dialects: self.config.runtime.supported_dialects.clone(),
                lock,
            });
        }

        let mut ctx = CheckContext::new(release.clone(), self.now())
            .with_critical_tags(critical_tags)
            .with_targets(profiles)
            .with_limits(self.config.limits)
            .with_deployer(self.config.runtime.deployer.clone());
        if strategy == StrategyKind::MaintenanceWindow {
            ctx = ctx.with_maintenance_window(Duration::seconds(
                self.config.maintenance.max_wait_secs as i64,
            ));
        }

        let run = self
            .pipeline
            .run(&release.release_id, &facts, &ctx, updates)
            .await;
        let record = PipelineRecord::encode(
            RecordKind::SafetyRun,
            run.run_id.clone(),
            release.release_id.clone(),
            &run,
        )?;
        self.store.put(record).await?;
        METRICS.inc_checks_run();
        obs::emit_check_completed(
            &release.release_id,
            &run.run_id,
            !run.is_blocked(),
            run.warning_count(),
        );
        Ok((run, facts))
    }

    /// Drive a deployment one step along its state machine.
    ///
    /// `queued` runs the checks and opens an approval round, `staging` waits
    /// for quorum, `ready` captures the checkpoint and runs the rollout to
    /// completion.
    pub async fn advance_deployment(&self, deployment_id: &str) -> PipelineResult<Deployment> {
        let release_id = self.get_deployment(deployment_id)?.release_id;
        self.advance_locked(deployment_id, &release_id)
            .instrument(obs::deployment_span(deployment_id, &release_id))
            .await
    }

    async fn advance_locked(&self, deployment_id: &str, release_id: &str) -> PipelineResult<Deployment> {
        let guard = self.locks.acquire(release_id).await;
        let mut deployment = self.get_deployment(deployment_id)?;
        let now = self.now();

        match deployment.status {
            DeploymentStatus::Queued => self.step_queued(deployment).await,
            DeploymentStatus::Staging => self.step_staging(deployment).await,
            DeploymentStatus::Ready => {
                self.recheck_quorum(&mut deployment).await?;
                match self.checkpoints.create_checkpoint(&deployment, now).await {
                    Ok(cp) => {
                        deployment.log(
                            LogLevel::Info,
                            None,
                            format!(
                                "checkpoint {} captured for {} target(s)",
                                cp.id,
                                cp.captured_state.len()
                            ),
                            now,
                        );
                        deployment.checkpoint_id = Some(cp.id);
                    }
                    Err(e) => return self.fail(deployment, e).await,
                }
                guard_checkpoint(&deployment)?;
                transition(&mut deployment, DeploymentStatus::Deploying, now)?;
                let control = self.register_control(&deployment.id, DeploymentControl::new());
                self.save(&deployment).await?;
                drop(guard);
                self.execute(deployment_id, release_id, control).await
            }
            DeploymentStatus::Deploying if self.control(deployment_id).is_none() => {
                deployment.log(LogLevel::Info, None, "continuing rollout", now);
                let control = self.register_control(&deployment.id, DeploymentControl::new());
                self.save(&deployment).await?;
                drop(guard);
                self.execute(deployment_id, release_id, control).await
            }
            DeploymentStatus::Deploying => Ok(deployment),
            status => Err(PipelineError::InvalidTransition {
                from: status.to_string(),
                to: if status == DeploymentStatus::Paused {
                    DeploymentStatus::Deploying.to_string()
                } else {
                    "next step".to_string()
                },
            }),
        }
    }

    fn register_control(&self, deployment_id: &str, control: DeploymentControl) -> Arc<DeploymentControl> {
        let control = Arc::new(control);
        self.registry()
            .controls
            .insert(deployment_id.to_string(), control.clone());
        control
    }

    /// Mark a deployment failed and return the error.
    async fn fail(&self, mut deployment: Deployment, err: PipelineError) -> PipelineResult<Deployment> {
        let now = self.now();
        deployment.failure = Some(failure_of(&err));
        transition(&mut deployment, DeploymentStatus::Failed, now)?;
        METRICS.inc_deployments_failed();
        self.save(&deployment).await?;
        Err(err)
    }

    async fn step_queued(&self, mut deployment: Deployment) -> PipelineResult<Deployment> {
        let release = self.release(&deployment.release_id).await?;
        let (run, facts) = self
            .evaluate_release(&release, deployment.strategy, &deployment.targets, None)
            .await?;
        let now = self.now();
        deployment.safety_run_id = Some(run.run_id.clone());

        if facts.is_degraded() {
            let degraded = PipelineError::ExtractionDegraded {
                files: facts
                    .files
                    .iter()
                    .filter(|f| f.degraded)
                    .map(|f| f.path.clone())
                    .collect(),
            };
            deployment.log(LogLevel::Warn, None, degraded.to_string(), now);
        }

        if let Err(e) = guard_checks(&run) {
            deployment.log(LogLevel::Error, None, e.to_string(), now);
            return self.fail(deployment, e).await;
        }

        let warnings = run.warning_count();
        let round = self
            .approvals
            .request_approvals(&deployment.release_id, warnings, now)
            .await?;
        deployment.log(
            LogLevel::Info,
            None,
            format!(
                "safety checks passed with {warnings} warning(s); approval round {} opened with {} slot(s)",
                round.round_id,
                round.slots.len()
            ),
            now,
        );
        deployment.approval_round_id = Some(round.round_id);
        transition(&mut deployment, DeploymentStatus::Staging, now)?;
        self.save(&deployment).await?;
        Ok(deployment)
    }

    async fn step_staging(&self, mut deployment: Deployment) -> PipelineResult<Deployment> {
        self.recheck_quorum(&mut deployment).await?;
        let now = self.now();
        transition(&mut deployment, DeploymentStatus::Ready, now)?;
        self.save(&deployment).await?;
        Ok(deployment)
    }

    /// Quorum guard for `staging → ready` and `ready → deploying`.
    ///
    /// A timed-out or rejected round sends the deployment back to `queued`;
    /// advancing again re-runs the checks and opens a fresh round.
    async fn recheck_quorum(&self, deployment: &mut Deployment) -> PipelineResult<()> {
        let now = self.now();
        self.approvals.refresh(&deployment.release_id, now).await?;
        let round = self.approvals.round(&deployment.release_id).ok_or_else(|| {
            PipelineError::QuorumNotMet {
                release_id: deployment.release_id.clone(),
                approved: 0,
                required: 0,
            }
        })?;
        deployment.approval_round_id = Some(round.round_id.clone());

        match guard_quorum(&round) {
            Ok(()) => {
                if deployment.status == DeploymentStatus::Staging {
                    deployment.log(
                        LogLevel::Info,
                        None,
                        format!("quorum met ({}/{})", round.approved_count(), round.required()),
                        now,
                    );
                }
                Ok(())
            }
            Err(e @ (PipelineError::ApprovalTimedOut { .. } | PipelineError::ApprovalRejected { .. })) => {
                deployment.log(LogLevel::Warn, None, e.to_string(), now);
                transition(deployment, DeploymentStatus::Queued, now)?;
                self.save(deployment).await?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Run the rollout outside the release guard and settle the outcome.
    async fn execute(
        &self,
        deployment_id: &str,
        release_id: &str,
        control: Arc<DeploymentControl>,
    ) -> PipelineResult<Deployment> {
        let deployment = self.get_deployment(deployment_id)?;
        let result = match self.load_snapshot(release_id).await {
            Ok((snapshot, facts)) => {
                let observer = ServiceObserver {
                    service: self,
                    deployment_id,
                    release_id,
                    control: control.clone(),
                };
                let rollout = Rollout {
                    deployment_id,
                    snapshot: &snapshot,
                    facts: &facts,
                    targets: &deployment.targets,
                    runtime: self.runtime.as_ref(),
                    config: &self.config,
                    clock: self.clock.as_ref(),
                    observer: &observer,
                };
                create_strategy(deployment.strategy).execute(&rollout).await
            }
            Err(e) => Err(RolloutError::Failed(e)),
        };

        let _guard = self.locks.acquire(release_id).await;
        self.registry().controls.remove(deployment_id);
        let mut deployment = self.get_deployment(deployment_id)?;
        let now = self.now();

        let result = match result {
            Ok(()) if control.is_cancelled() => Err(RolloutError::Cancelled),
            other => other,
        };
        // A pause that arrived after the last boundary; leave it before
        // settling on completed or failed.
        if deployment.status == DeploymentStatus::Paused
            && !matches!(result, Err(RolloutError::Cancelled))
        {
            transition(&mut deployment, DeploymentStatus::Deploying, now)?;
        }

        match result {
            Ok(()) => {
                transition(&mut deployment, DeploymentStatus::Completed, now)?;
                self.retain_checkpoint(&deployment).await?;
                self.save(&deployment).await?;
                info!(deployment_id = %deployment.id, "deployment completed");
                Ok(deployment)
            }
            Err(RolloutError::Cancelled) => {
                deployment.log(LogLevel::Warn, None, "cancelled; restoring checkpoint", now);
                let by = deployment.requested_by.clone();
                self.roll_back_into(&mut deployment, &by, "cancelled while deploying")
                    .await;
                transition(&mut deployment, DeploymentStatus::Cancelled, now)?;
                self.retain_checkpoint(&deployment).await?;
                self.save(&deployment).await?;
                Ok(deployment)
            }
            Err(RolloutError::Failed(err)) => {
                deployment.log(LogLevel::Error, None, err.to_string(), now);
                if err.needs_manual_verification() {
                    deployment.log(LogLevel::Error, None, err.remediation(), now);
                }
                deployment.failure = Some(failure_of(&err));
                transition(&mut deployment, DeploymentStatus::Failed, now)?;
                METRICS.inc_deployments_failed();
                self.roll_back_into(&mut deployment, "system", &err.to_string())
                    .await;
                self.retain_checkpoint(&deployment).await?;
                self.save(&deployment).await?;
                Err(err)
            }
        }
    }

    /// Roll back and record the outcome in the deployment log. Failures are
    /// logged, not returned: the caller is already settling another outcome.
    async fn roll_back_into(&self, deployment: &mut Deployment, initiated_by: &str, reason: &str) {
        if deployment.checkpoint_id.is_none() {
            return;
        }
        let now = self.now();
        let result = self
            .checkpoints
            .rollback(deployment, initiated_by, reason, now)
            .await;
        if let Some(rb) = self.checkpoints.rollback_for(&deployment.id) {
            deployment.rollback_id = Some(rb.id);
        }
        match result {
            Ok(rb) => {
                deployment.log(
                    LogLevel::Warn,
                    None,
                    format!("rolled back to checkpoint {} (rollback {})", rb.checkpoint_id, rb.id),
                    now,
                );
            }
            Err(e) => {
                error!(deployment_id = %deployment.id, error = %e, "automatic rollback failed");
                deployment.log(LogLevel::Error, None, format!("{e}; {}", e.remediation()), now);
            }
        }
    }

    async fn retain_checkpoint(&self, deployment: &Deployment) -> PipelineResult<()> {
        if let (Some(cp), Some(finished)) = (&deployment.checkpoint_id, deployment.finished_at) {
            self.checkpoints.mark_retained(cp, finished).await?;
        }
        Ok(())
    }

    /// Park a running rollout at its next step boundary.
    pub async fn pause_deployment(&self, deployment_id: &str) -> PipelineResult<Deployment> {
        let release_id = self.get_deployment(deployment_id)?.release_id;
        let _guard = self.locks.acquire(&release_id).await;
        let mut deployment = self.get_deployment(deployment_id)?;
        let now = self.now();
        transition(&mut deployment, DeploymentStatus::Paused, now)?;
        if let Some(control) = self.control(deployment_id) {
            control.pause();
            deployment.log(
                LogLevel::Info,
                None,
                "pause takes effect at the next step boundary",
                now,
            );
        }
        self.save(&deployment).await?;
        Ok(deployment)
    }

    /// Resume a paused rollout.
    ///
    /// A rollout interrupted by a restart has no executor; it continues on
    /// the next `advance_deployment`.
    pub async fn resume_deployment(&self, deployment_id: &str) -> PipelineResult<Deployment> {
        let release_id = self.get_deployment(deployment_id)?.release_id;
        let _guard = self.locks.acquire(&release_id).await;
        let mut deployment = self.get_deployment(deployment_id)?;
        let now = self.now();
        transition(&mut deployment, DeploymentStatus::Deploying, now)?;
        match self.control(deployment_id) {
            Some(control) => {
                control.resume();
            }
            None => {
                deployment.log(LogLevel::Info, None, "advance the deployment to continue the rollout", now);
            }
        }
        self.save(&deployment).await?;
        Ok(deployment)
    }

    /// Cancel a deployment.
    ///
    /// Before `deploying` this is immediate. A running rollout stops at its
    /// next step boundary, restores its checkpoint and ends `cancelled`.
    pub async fn cancel_deployment(&self, deployment_id: &str) -> PipelineResult<Deployment> {
        let release_id = self.get_deployment(deployment_id)?.release_id;
        let _guard = self.locks.acquire(&release_id).await;
        let mut deployment = self.get_deployment(deployment_id)?;
        let now = self.now();

        if let Some(control) = self.control(deployment_id) {
            control.cancel();
            deployment.log(
                LogLevel::Warn,
                None,
                "cancel requested; rolling back at the next step boundary",
                now,
            );
            self.save(&deployment).await?;
            return Ok(deployment);
        }

        if !deployment.status.can_transition_to(DeploymentStatus::Cancelled) {
            return Err(PipelineError::InvalidTransition {
                from: deployment.status.to_string(),
                to: DeploymentStatus::Cancelled.to_string(),
            });
        }
        if matches!(
            deployment.status,
            DeploymentStatus::Deploying | DeploymentStatus::Paused
        ) {
            let by = deployment.requested_by.clone();
            self.roll_back_into(&mut deployment, &by, "cancelled").await;
        }
        transition(&mut deployment, DeploymentStatus::Cancelled, now)?;
        self.retain_checkpoint(&deployment).await?;
        self.save(&deployment).await?;
        Ok(deployment)
    }

    /// Record an approver's decision and note it on the release's deployment.
    ///
    /// The decision that completes quorum moves a `staging` deployment to
    /// `ready`; a rejection sends it back to `queued`.
    pub async fn submit_approval(
        &self,
        approval_id: &str,
        approver: &Approver,
        decision: ApprovalDecision,
        comment: Option<String>,
    ) -> PipelineResult<DeployApproval> {
        let release_id = self.approvals.release_of(approval_id).ok_or_else(|| {
            crate::approvals::ApprovalError::NotFound {
                approval_id: approval_id.to_string(),
            }
        })?;
        let _guard = self.locks.acquire(&release_id).await;
        let result = self
            .approvals
            .submit_approval(approval_id, approver, decision, comment.clone(), self.now())
            .await;

        if let Some(active) = self.active_deployment(&release_id) {
            let line = match &result {
                Ok(slot) => format!(
                    "approval {} {} by {}{}",
                    slot.id,
                    decision.as_str(),
                    approver.id,
                    comment.map(|c| format!(": {c}")).unwrap_or_default()
                ),
                Err(e) => format!("approval {approval_id} not recorded: {e}"),
            };
            let level = if result.is_ok() { LogLevel::Info } else { LogLevel::Warn };
            self.update(&active.id, |d, now| {
                d.log(level, None, line, now);
            })
            .await?;
        }
        // a refused submission may still have found the round past due
        self.settle_round(&release_id).await?;
        Ok(result?)
    }

    /// Force-approve the release's pending slots.
    pub async fn emergency_bypass(
        &self,
        release_id: &str,
        approver: &Approver,
        justification: &str,
    ) -> PipelineResult<usize> {
        let _guard = self.locks.acquire(release_id).await;
        let forced = self
            .approvals
            .emergency_bypass(release_id, approver, justification, self.now())
            .await?;
        if let Some(active) = self.active_deployment(release_id) {
            let line = format!(
                "emergency bypass by {} ({}) forced {forced} approval(s): {}",
                approver.id,
                approver.role,
                justification.trim()
            );
            self.update(&active.id, |d, now| {
                d.log(LogLevel::Warn, None, line, now);
            })
            .await?;
        }
        self.settle_round(release_id).await?;
        Ok(forced)
    }

    /// Apply the live round's outcome to the release's waiting deployment.
    ///
    /// Quorum moves `staging` to `ready`; a rejected or timed-out round sends
    /// `staging`/`ready` back to `queued`. Caller holds the release guard.
    async fn settle_round(&self, release_id: &str) -> PipelineResult<Option<Deployment>> {
        let Some(mut deployment) = self.active_deployment(release_id) else {
            return Ok(None);
        };
        if !matches!(
            deployment.status,
            DeploymentStatus::Staging | DeploymentStatus::Ready
        ) {
            return Ok(None);
        }
        match self.recheck_quorum(&mut deployment).await {
            Ok(()) if deployment.status == DeploymentStatus::Staging => {
                transition(&mut deployment, DeploymentStatus::Ready, self.now())?;
                self.save(&deployment).await?;
                Ok(Some(deployment))
            }
            Ok(()) | Err(PipelineError::QuorumNotMet { .. }) => Ok(None),
            // recheck_quorum already moved it back to queued
            Err(PipelineError::ApprovalRejected { .. } | PipelineError::ApprovalTimedOut { .. }) => {
                Ok(Some(deployment))
            }
            Err(e) => Err(e),
        }
    }

    /// Time out every approval round past its deadline and send the waiting
    /// deployments back to `queued`. Returns the deployments that moved.
    pub async fn expire_approvals(&self) -> PipelineResult<Vec<Deployment>> {
        let expired = self.approvals.expire_due(self.now()).await?;
        let mut moved = Vec::new();
        for release_id in expired {
            let _guard = self.locks.acquire(&release_id).await;
            if let Some(deployment) = self.settle_round(&release_id).await? {
                info!(
                    deployment_id = %deployment.id,
                    release_id = %release_id,
                    "approval round expired; deployment requeued"
                );
                moved.push(deployment);
            }
        }
        Ok(moved)
    }

    /// Sweep approval deadlines every `every` until the service is dropped.
    pub fn spawn_approval_sweeper(
        self: &Arc<Self>,
        every: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        let service = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(service) = service.upgrade() else {
                    break;
                };
                if let Err(e) = service.expire_approvals().await {
                    warn!(error = %e, "approval sweep failed");
                }
            }
        })
    }

    /// Operator-initiated rollback of a finished deployment.
    pub async fn execute_rollback(
        &self,
        deployment_id: &str,
        initiated_by: &str,
        reason: &str,
    ) -> PipelineResult<Rollback> {
        let release_id = self.get_deployment(deployment_id)?.release_id;
        let _guard = self.locks.acquire(&release_id).await;
        let mut deployment = self.get_deployment(deployment_id)?;
        let now = self.now();
        self.checkpoints.can_rollback(&deployment, now)?;

        let result = self
            .checkpoints
            .rollback(&deployment, initiated_by, reason, now)
            .await;
        if let Some(rb) = self.checkpoints.rollback_for(deployment_id) {
            deployment.rollback_id = Some(rb.id);
        }
        match &result {
            Ok(rb) => deployment.log(
                LogLevel::Warn,
                None,
                format!("rollback {} by {initiated_by} ({reason}) completed", rb.id),
                now,
            ),
            Err(e) => deployment.log(LogLevel::Error, None, format!("{e}; {}", e.remediation()), now),
        };
        self.save(&deployment).await?;
        result
    }

    /// Watch a completed deployment for the monitoring window and roll it
    /// back on a breach.
    pub async fn monitor_deployment(&self, deployment_id: &str) -> PipelineResult<MonitorOutcome> {
        let deployment = self.get_deployment(deployment_id)?;
        if deployment.status != DeploymentStatus::Completed {
            return Err(PipelineError::InvalidTransition {
                from: deployment.status.to_string(),
                to: "monitoring".to_string(),
            });
        }
        let cfg = &self.config.monitoring;
        let monitor = HealthMonitor::new(
            self.runtime.as_ref(),
            cfg.thresholds,
            cfg.interval(),
            self.config.runtime.call_timeout(),
        );
        let outcome = monitor
            .run(&deployment.targets, rounds_for(cfg.window(), cfg.interval()))
            .instrument(obs::deployment_span(deployment_id, &deployment.release_id))
            .await;

        let _guard = self.locks.acquire(&deployment.release_id).await;
        let mut deployment = self.get_deployment(deployment_id)?;
        let now = self.now();
        match &outcome {
            MonitorOutcome::Breach { target, reason } => {
                deployment.log(
                    LogLevel::Error,
                    Some(target),
                    format!("health breach: {reason}; rolling back"),
                    now,
                );
                obs::emit_health_breach(deployment_id, target, reason);
                METRICS.inc_health_breaches();
                self.roll_back_into(&mut deployment, "monitor", reason).await;
            }
            MonitorOutcome::Healthy { samples, missed } => {
                deployment.log(
                    LogLevel::Info,
                    None,
                    format!("observation window passed ({samples} samples, {missed} missed)"),
                    now,
                );
            }
        }
        self.save(&deployment).await?;
        Ok(outcome)
    }

    /// Rebuild in-memory state from the pipeline store.
    ///
    /// Deployments that were `deploying` when the process stopped come back
    /// `paused`; the operator decides whether to resume or cancel.
    pub async fn recover(&self) -> PipelineResult<usize> {
        let records = self.store.list(RecordKind::Deployment, None).await?;
        let now = self.now();
        let mut recovered = 0;
        for record in records {
            let mut deployment: Deployment = record.decode()?;
            if deployment.status == DeploymentStatus::Deploying {
                transition(&mut deployment, DeploymentStatus::Paused, now)?;
                deployment.log(
                    LogLevel::Warn,
                    None,
                    "interrupted by a restart while deploying; resume or cancel",
                    now,
                );
                warn!(deployment_id = %deployment.id, "recovered interrupted deployment as paused");
            }
            self.save(&deployment).await?;
            recovered += 1;
        }
        let rounds = self.approvals.load().await?;
        let checkpoints = self.checkpoints.load().await?;
        info!(
            deployments = recovered,
            approval_rounds = rounds,
            checkpoint_records = checkpoints,
            "pipeline state recovered"
        );
        Ok(recovered)
    }
}

/// Routes rollout output into the deployment record under the release guard.
struct ServiceObserver<'a> {
    service: &'a DeploymentService,
    deployment_id: &'a str,
    release_id: &'a str,
    control: Arc<DeploymentControl>,
}

impl ServiceObserver<'_> {
    async fn apply<F>(&self, f: F)
    where
        F: FnOnce(&mut Deployment, DateTime<Utc>) + Send,
    {
        let _guard = self.service.locks.acquire(self.release_id).await;
        if let Err(e) = self.service.update(self.deployment_id, f).await {
            warn!(deployment_id = %self.deployment_id, error = %e, "failed to record rollout progress");
        }
    }
}

#[async_trait]
impl RolloutObserver for ServiceObserver<'_> {
    async fn log(&self, level: LogLevel, target: Option<&str>, message: &str) {
        let target = target.map(str::to_string);
        let message = message.to_string();
        self.apply(move |d, now| {
            d.log(level, target.as_deref(), message, now);
        })
        .await;
    }

    async fn progress(&self, percent: u8) {
        self.apply(move |d, _| d.percent = percent).await;
    }

    async fn boundary(&self) -> Result<(), RolloutError> {
        match self.control.signal() {
            ControlSignal::Run => Ok(()),
            ControlSignal::Cancel => Err(RolloutError::Cancelled),
            ControlSignal::Pause => {
                self.apply(|d, now| {
                    d.log(LogLevel::Info, None, "paused at step boundary", now);
                })
                .await;
                if self.control.boundary().await {
                    Ok(())
                } else {
                    Err(RolloutError::Cancelled)
                }
            }
        }
    }
}
