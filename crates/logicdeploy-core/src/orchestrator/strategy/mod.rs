//! Rollout strategies.
//!
//! A strategy only drives target runtime calls. State transitions, the
//! checkpoint and rollback stay with the orchestrator; the strategy reports
//! back through a [`RolloutObserver`] and checks it for pause and cancel
//! between steps.

pub mod atomic;
pub mod canary;
pub mod chunked;
pub mod maintenance;

pub use atomic::AtomicRollout;
pub use canary::CanaryRollout;
pub use chunked::ChunkedRollout;
pub use maintenance::MaintenanceRollout;

use async_trait::async_trait;
use logicdeploy_safety::ExtractedFacts;
use logicdeploy_state::{Snapshot, StagedArtifact, TargetRuntime};
use tracing::warn;

use crate::config::PipelineConfig;
use crate::domain::{LogLevel, PipelineError, StrategyKind};
use crate::orchestrator::calls::{CallOutcome, RuntimeCalls};
use crate::orchestrator::clock::Clock;

/// Why a rollout stopped early.
#[derive(Debug)]
pub enum RolloutError {
    /// The operator cancelled at a boundary.
    Cancelled,
    Failed(PipelineError),
}

impl From<PipelineError> for RolloutError {
    fn from(err: PipelineError) -> Self {
        Self::Failed(err)
    }
}

/// Sink for what a rollout does, plus its pause/cancel boundary.
#[async_trait]
pub trait RolloutObserver: Send + Sync {
    async fn log(&self, level: LogLevel, target: Option<&str>, message: &str);

    async fn progress(&self, percent: u8);

    /// Parks while the deployment is paused.
    ///
    /// # Errors
    ///
    /// Returns `RolloutError::Cancelled` once the deployment is cancelled.
    async fn boundary(&self) -> Result<(), RolloutError>;
}

/// Everything a strategy needs for one rollout.
pub struct Rollout<'a> {
    pub deployment_id: &'a str,
    pub snapshot: &'a Snapshot,
    pub facts: &'a ExtractedFacts,
    pub targets: &'a [String],
    pub runtime: &'a dyn TargetRuntime,
    pub config: &'a PipelineConfig,
    pub clock: &'a dyn Clock,
    pub observer: &'a dyn RolloutObserver,
}

impl<'a> Rollout<'a> {
    pub fn calls(&self) -> RuntimeCalls<'a> {
        RuntimeCalls::new(self.runtime, &self.config.runtime)
    }

    async fn info(&self, target: Option<&str>, message: &str) {
        self.observer.log(LogLevel::Info, target, message).await;
    }

    async fn warn(&self, target: Option<&str>, message: &str) {
        self.observer.log(LogLevel::Warn, target, message).await;
    }

    /// Log a call that was only settled by re-querying the target.
    async fn note_outcome(&self, target: &str, operation: &str, outcome: CallOutcome) {
        if outcome == CallOutcome::ConfirmedAfterTimeout {
            self.warn(
                Some(target),
                &format!("{operation} timed out; re-query confirmed it took effect"),
            )
            .await;
        }
    }

    /// Upload the snapshot to `target` and have the target validate it.
    pub async fn stage(&self, target: &str) -> Result<StagedArtifact, RolloutError> {
        let calls = self.calls();
        let artifact = calls
            .call(target, "upload", self.runtime.upload(target, self.snapshot))
            .await
            .map_err(PipelineError::Runtime)?;
        calls
            .call(target, "validate", self.runtime.validate(&artifact))
            .await
            .map_err(PipelineError::Runtime)?;
        self.info(
            Some(target),
            &format!(
                "staged snapshot {} as {}",
                self.snapshot.snapshot_id, artifact.staging_ref
            ),
        )
        .await;
        Ok(artifact)
    }

    /// Swap a staged artifact in as the running program.
    pub async fn activate(&self, artifact: &StagedArtifact) -> Result<(), RolloutError> {
        let snapshot_id = self.snapshot.snapshot_id.clone();
        let outcome = self
            .calls()
            .mutate(
                &artifact.target,
                "activate",
                self.runtime.activate(artifact),
                move |s| s.active_snapshot.as_deref() == Some(snapshot_id.as_str()),
            )
            .await?;
        self.note_outcome(&artifact.target, "activate", outcome).await;
        self.info(
            Some(&artifact.target),
            &format!("activated snapshot {}", self.snapshot.snapshot_id),
        )
        .await;
        Ok(())
    }

    /// Drop the staged copy. A failure here leaves the rollout intact.
    pub async fn cleanup(&self, artifact: &StagedArtifact) {
        let result = self
            .calls()
            .call(&artifact.target, "cleanup", self.runtime.cleanup(artifact))
            .await;
        if let Err(e) = result {
            warn!(target_id = %artifact.target, error = %e, "cleanup failed");
            self.warn(Some(&artifact.target), &format!("cleanup failed: {e}"))
                .await;
        }
    }

    /// Stage, activate and clean up on one target.
    pub async fn deploy_target(&self, target: &str) -> Result<(), RolloutError> {
        let artifact = self.stage(target).await?;
        self.activate(&artifact).await?;
        self.cleanup(&artifact).await;
        Ok(())
    }
}

/// Percentage of `done` out of `total`, clamped to 100.
pub(crate) fn percent(done: usize, total: usize) -> u8 {
    (done * 100 / total.max(1)).min(100) as u8
}

/// A rollout strategy.
#[async_trait]
pub trait RolloutStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn execute(&self, rollout: &Rollout<'_>) -> Result<(), RolloutError>;
}

/// Factory for rollout strategies.
pub fn create_strategy(kind: StrategyKind) -> Box<dyn RolloutStrategy> {
    match kind {
        StrategyKind::Atomic => Box::new(AtomicRollout),
        StrategyKind::Canary => Box::new(CanaryRollout),
        StrategyKind::Chunked => Box::new(ChunkedRollout),
        StrategyKind::MaintenanceWindow => Box::new(MaintenanceRollout),
    }
}
