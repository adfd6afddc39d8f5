//! Pipeline error taxonomy.

use logicdeploy_safety::CheckSeverity;
use logicdeploy_state::{RuntimeError, StorageError};

use crate::approvals::ApprovalError;

/// Errors surfaced by the deployment pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("extraction degraded for {} file(s): {}", files.len(), files.join(", "))]
    ExtractionDegraded { files: Vec<String> },

    #[error("safety check {check} failed ({severity:?}): {message}")]
    CheckFailed {
        check: String,
        severity: CheckSeverity,
        message: String,
    },

    #[error("approval rejected for release {release_id}: {reason}")]
    ApprovalRejected { release_id: String, reason: String },

    #[error("approval round for release {release_id} timed out")]
    ApprovalTimedOut { release_id: String },

    #[error("quorum not met for release {release_id}: {approved}/{required} approvals")]
    QuorumNotMet {
        release_id: String,
        approved: usize,
        required: usize,
    },

    #[error("checkpoint failed on {target}: {reason}")]
    CheckpointFailed { target: String, reason: String },

    #[error("lost contact with {target} during {operation}: {detail}")]
    RuntimeCommunication {
        target: String,
        operation: String,
        detail: String,
    },

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("rollback of deployment {deployment_id} failed: {reason}")]
    RollbackFailed {
        deployment_id: String,
        reason: String,
    },

    #[error("canary halted at cohort {cohort} on {target}: {reason}")]
    CanaryHalted {
        cohort: usize,
        target: String,
        reason: String,
    },

    #[error("no maintenance window for {target}: {reason}")]
    NoMaintenanceWindow { target: String, reason: String },

    #[error("approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("deployment not found: {0}")]
    DeploymentNotFound(String),

    #[error("release not found: {0}")]
    ReleaseNotFound(String),

    #[error("release {release_id} already has active deployment {deployment_id}")]
    ActiveDeploymentExists {
        release_id: String,
        deployment_id: String,
    },

    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("rollback unavailable for deployment {deployment_id}: {reason}")]
    RollbackUnavailable {
        deployment_id: String,
        reason: String,
    },

    #[error("invalid rollout plan: {0}")]
    InvalidPlan(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// What an operator should do next.
    pub fn remediation(&self) -> String {
        match self {
            Self::ExtractionDegraded { .. } => {
                "fix the declaration blocks in the listed files and re-run the checks".into()
            }
            Self::CheckFailed { check, .. } => {
                format!("resolve the {check} findings, publish a new release and deploy again")
            }
            Self::ApprovalRejected { .. } => {
                "address the reviewer's comments and request a new approval round".into()
            }
            Self::ApprovalTimedOut { .. } => {
                "request a new approval round and notify the approvers".into()
            }
            Self::QuorumNotMet { .. } => "wait for the remaining approvals".into(),
            Self::CheckpointFailed { target, .. } => {
                format!("restore connectivity to {target}; nothing was changed on any target")
            }
            Self::RuntimeCommunication { target, .. } => format!(
                "manual verification required: confirm the program running on {target} before redeploying"
            ),
            Self::Runtime(e) => format!("inspect {} and redeploy once it accepts the program", e.target()),
            Self::RollbackFailed { .. } => {
                "manual intervention required: restore the captured program on the affected targets".into()
            }
            Self::CanaryHalted { target, .. } => {
                format!("investigate the health of {target} before retrying the rollout")
            }
            Self::NoMaintenanceWindow { target, .. } => {
                format!("schedule and approve a maintenance window for {target}")
            }
            Self::Approval(_) => "correct the approval request and submit again".into(),
            Self::Storage(_) | Self::Serialization(_) => {
                "check the pipeline database and retry".into()
            }
            Self::DeploymentNotFound(_) | Self::ReleaseNotFound(_) => {
                "verify the identifier and retry".into()
            }
            Self::ActiveDeploymentExists { deployment_id, .. } => {
                format!("wait for {deployment_id} to finish or cancel it")
            }
            Self::InvalidTransition { .. } => "refresh the deployment state and retry".into(),
            Self::RollbackUnavailable { .. } => {
                "no usable checkpoint remains; redeploy a known-good release instead".into()
            }
            Self::InvalidPlan(_) => {
                "break the dependency cycle between the listed files or use another strategy".into()
            }
            Self::Config(_) => "fix the pipeline configuration file".into(),
        }
    }

    /// Whether the failure leaves the remote outcome unknown.
    pub fn needs_manual_verification(&self) -> bool {
        matches!(self, Self::RuntimeCommunication { .. } | Self::RollbackFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::QuorumNotMet {
            release_id: "rel-1".into(),
            approved: 1,
            required: 2,
        };
        assert!(err.to_string().contains("1/2"));
    }

    #[test]
    fn test_rollback_failure_asks_for_manual_intervention() {
        let err = PipelineError::RollbackFailed {
            deployment_id: "dep-1".into(),
            reason: "restore rejected".into(),
        };
        assert!(err.remediation().contains("manual intervention required"));
        assert!(err.needs_manual_verification());
    }

    #[test]
    fn test_communication_failure_asks_for_verification() {
        let err = PipelineError::RuntimeCommunication {
            target: "plc-1".into(),
            operation: "activate".into(),
            detail: "no answer".into(),
        };
        assert!(err.remediation().starts_with("manual verification required"));
    }
}
