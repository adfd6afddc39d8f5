//! Error types for the approval workflow.

use logicdeploy_state::StorageError;

use super::slot::{ApprovalStatus, RoundStatus};

/// Errors produced by the approval workflow.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("approval not found: {approval_id}")]
    NotFound { approval_id: String },

    #[error("approval {approval_id} already decided ({status:?})")]
    AlreadyDecided {
        approval_id: String,
        status: ApprovalStatus,
    },

    #[error("role {role} may not decide approval {approval_id}")]
    RoleNotEligible { role: String, approval_id: String },

    #[error("{approver} already holds a slot for release {release_id}")]
    DuplicateApprover {
        approver: String,
        release_id: String,
    },

    #[error("approval {approval_id} must wait for slot {waiting_on}")]
    OutOfOrder {
        approval_id: String,
        waiting_on: String,
    },

    #[error("approval round {round_id} is closed ({status:?})")]
    RoundClosed { round_id: String, status: RoundStatus },

    #[error("approval round {round_id} timed out")]
    TimedOut { round_id: String },

    #[error("no approval round for release {release_id}")]
    NoRound { release_id: String },

    #[error("emergency bypass is not permitted for role {role}")]
    BypassNotAllowed { role: String },

    #[error("emergency bypass requires a justification")]
    JustificationRequired,

    #[error("audit trail error: {0}")]
    Audit(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for approval operations.
pub type ApprovalResult<T> = std::result::Result<T, ApprovalError>;
