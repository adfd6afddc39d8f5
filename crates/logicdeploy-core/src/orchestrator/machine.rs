//! Deployment state machine: edge validation plus the guards that sit on
//! top of the edges.

use chrono::{DateTime, Utc};
use logicdeploy_safety::{CheckStatus, SafetyRun};

use crate::approvals::{ApprovalRound, RoundStatus};
use crate::domain::{Deployment, DeploymentStatus, LogLevel, PipelineError, PipelineResult};
use crate::obs;

/// Move `deployment` to `to`, stamping timestamps and logging the change.
///
/// # Errors
///
/// Returns `PipelineError::InvalidTransition` if the edge does not exist.
pub fn transition(
    deployment: &mut Deployment,
    to: DeploymentStatus,
    now: DateTime<Utc>,
) -> PipelineResult<DeploymentStatus> {
    let from = deployment.status;
    if !from.can_transition_to(to) {
        return Err(PipelineError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        });
    }
    deployment.status = to;
    if to == DeploymentStatus::Deploying && deployment.started_at.is_none() {
        deployment.started_at = Some(now);
    }
    if to.is_terminal() {
        deployment.finished_at = Some(now);
        if to == DeploymentStatus::Completed {
            deployment.percent = 100;
        }
    }
    let level = match to {
        DeploymentStatus::Failed => LogLevel::Error,
        DeploymentStatus::Cancelled | DeploymentStatus::Paused => LogLevel::Warn,
        _ => LogLevel::Info,
    };
    deployment.log(level, None, format!("status {from} -> {to}"), now);
    obs::emit_deployment_transition(&deployment.id, from, to);
    Ok(from)
}

/// `queued → staging`: every check evaluated and none blocking.
///
/// # Errors
///
/// Returns `PipelineError::CheckFailed` for the first blocking check.
pub fn guard_checks(run: &SafetyRun) -> PipelineResult<()> {
    if run.checks.is_empty() {
        return Err(PipelineError::CheckFailed {
            check: "safety".into(),
            severity: logicdeploy_safety::CheckSeverity::Critical,
            message: "no checks were evaluated".into(),
        });
    }
    match run.checks.iter().find(|c| c.is_blocking()) {
        Some(check) => Err(PipelineError::CheckFailed {
            check: check.name.clone(),
            severity: check.severity,
            message: if check.status == CheckStatus::Failed {
                check.message.clone()
            } else {
                "not evaluated".into()
            },
        }),
        None => Ok(()),
    }
}

/// `staging → ready`: quorum met on a live round with no rejection.
///
/// # Errors
///
/// Returns `ApprovalRejected`, `ApprovalTimedOut` or `QuorumNotMet`.
pub fn guard_quorum(round: &ApprovalRound) -> PipelineResult<()> {
    if let Some(rejected) = round.rejection() {
        return Err(PipelineError::ApprovalRejected {
            release_id: round.release_id.clone(),
            reason: format!(
                "{} rejected{}",
                rejected.approver.as_deref().unwrap_or("approver"),
                rejected
                    .comment
                    .as_deref()
                    .map(|c| format!(": {c}"))
                    .unwrap_or_default()
            ),
        });
    }
    if round.status == RoundStatus::TimedOut {
        return Err(PipelineError::ApprovalTimedOut {
            release_id: round.release_id.clone(),
        });
    }
    if !round.all_approved() {
        return Err(PipelineError::QuorumNotMet {
            release_id: round.release_id.clone(),
            approved: round.approved_count(),
            required: round.required(),
        });
    }
    Ok(())
}

/// `ready → deploying`: a checkpoint was captured.
pub fn guard_checkpoint(deployment: &Deployment) -> PipelineResult<()> {
    match deployment.checkpoint_id {
        Some(_) => Ok(()),
        None => Err(PipelineError::CheckpointFailed {
            target: deployment.targets.join(","),
            reason: "no checkpoint captured".into(),
        }),
    }
}
