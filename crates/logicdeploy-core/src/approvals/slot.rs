//! Approval slots and rounds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::policy::ApprovalMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Reject,
}

impl ApprovalDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }
}

/// The person deciding a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approver {
    pub id: String,
    pub role: String,
}

impl Approver {
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
        }
    }
}

/// One required sign-off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployApproval {
    pub id: String,
    pub round_id: String,
    pub release_id: String,
    /// Position within the round; sequential mode decides in this order.
    pub position: usize,
    /// Role this slot was raised for; `None` for an open slot.
    pub approver_role: Option<String>,
    /// Roles that may decide this slot. Empty means anyone.
    pub eligible_roles: Vec<String>,
    pub status: ApprovalStatus,
    pub approver: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub comment: Option<String>,
}

impl DeployApproval {
    pub fn is_eligible(&self, role: &str) -> bool {
        self.eligible_roles.is_empty() || self.eligible_roles.iter().any(|r| r == role)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Open,
    Approved,
    Rejected,
    TimedOut,
    /// Replaced by a newer round for the same release.
    Superseded,
}

impl RoundStatus {
    /// No further decisions are accepted.
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Rejected | Self::TimedOut | Self::Superseded)
    }
}

/// Record of an emergency bypass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BypassRecord {
    pub approver: Approver,
    pub justification: String,
    pub at: DateTime<Utc>,
}

/// The set of slots one release must fill before it may deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRound {
    pub round_id: String,
    pub release_id: String,
    pub mode: ApprovalMode,
    pub two_person_rule: bool,
    pub slots: Vec<DeployApproval>,
    pub status: RoundStatus,
    pub opened_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub bypass: Option<BypassRecord>,
}

impl ApprovalRound {
    pub fn approved_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.status == ApprovalStatus::Approved)
            .count()
    }

    pub fn rejection(&self) -> Option<&DeployApproval> {
        self.slots
            .iter()
            .find(|s| s.status == ApprovalStatus::Rejected)
    }

    /// Approvals needed for quorum under the round's mode.
    pub fn required(&self) -> usize {
        match self.mode {
            ApprovalMode::Parallel | ApprovalMode::Sequential => self.slots.len(),
            ApprovalMode::Majority => self.slots.len() / 2 + 1,
        }
    }

    pub fn quorum_met(&self) -> bool {
        self.slots.is_empty() || self.approved_count() >= self.required()
    }

    /// Quorum met, nothing rejected, and the round still stands.
    pub fn all_approved(&self) -> bool {
        !self.status.is_closed() && self.rejection().is_none() && self.quorum_met()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|e| now >= e)
    }

    pub fn slot(&self, approval_id: &str) -> Option<&DeployApproval> {
        self.slots.iter().find(|s| s.id == approval_id)
    }
}
