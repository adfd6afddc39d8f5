//! Approval engine: seeds rounds and applies decisions under policy.
//!
//! Functions here are pure over an [`ApprovalRound`]; callers own locking
//! and persistence.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::error::{ApprovalError, ApprovalResult};
use super::policy::{ApprovalMode, ApprovalPolicy};
use super::slot::{
    ApprovalDecision, ApprovalRound, ApprovalStatus, Approver, BypassRecord, DeployApproval,
    RoundStatus,
};

/// Seed a round for `release_id`.
///
/// Slots are raised in order: one per required role, open slots up to
/// `min_approvals`, then escalation slots for safety warnings.
pub fn open_round(
    release_id: &str,
    policy: &ApprovalPolicy,
    warnings: usize,
    now: DateTime<Utc>,
) -> ApprovalRound {
    let round_id = Uuid::new_v4().to_string();
    let total = policy.slot_count(warnings);

    let slots = (0..total)
        .map(|position| {
            let role = policy.required_roles.get(position);
            DeployApproval {
                id: Uuid::new_v4().to_string(),
                round_id: round_id.clone(),
                release_id: release_id.to_string(),
                position,
                approver_role: role.cloned(),
                eligible_roles: match role {
                    Some(r) => vec![r.clone()],
                    None => policy.eligible_roles.clone(),
                },
                status: ApprovalStatus::Pending,
                approver: None,
                timestamp: None,
                comment: None,
            }
        })
        .collect::<Vec<_>>();

    let mut round = ApprovalRound {
        round_id,
        release_id: release_id.to_string(),
        mode: policy.mode,
        two_person_rule: policy.two_person_rule,
        slots,
        status: RoundStatus::Open,
        opened_at: now,
        expires_at: policy
            .timeout_secs
            .map(|secs| now + Duration::seconds(secs as i64)),
        bypass: None,
    };
    evaluate_round(&mut round);
    round
}

/// Apply one decision to a slot.
///
/// # Errors
///
/// Returns `ApprovalError::RoundClosed` if the round was rejected, timed out or superseded.
/// Returns `ApprovalError::TimedOut` if the round expired; the round is marked timed out.
/// Returns `ApprovalError::NotFound` if the slot is not part of the round.
/// Returns `ApprovalError::AlreadyDecided` if the slot is not pending.
/// Returns `ApprovalError::RoleNotEligible` if the approver's role may not decide the slot.
/// Returns `ApprovalError::DuplicateApprover` if the two-person rule is violated.
/// Returns `ApprovalError::OutOfOrder` if an earlier slot is undecided in sequential mode.
pub fn submit_decision(
    round: &mut ApprovalRound,
    approval_id: &str,
    approver: &Approver,
    decision: ApprovalDecision,
    comment: Option<String>,
    now: DateTime<Utc>,
) -> ApprovalResult<DeployApproval> {
    if round.status.is_closed() {
        return Err(ApprovalError::RoundClosed {
            round_id: round.round_id.clone(),
            status: round.status,
        });
    }
    if expire_round(round, now) {
        return Err(ApprovalError::TimedOut {
            round_id: round.round_id.clone(),
        });
    }

    let idx = round
        .slots
        .iter()
        .position(|s| s.id == approval_id)
        .ok_or_else(|| ApprovalError::NotFound {
            approval_id: approval_id.to_string(),
        })?;
    let slot = &round.slots[idx];

    if slot.status != ApprovalStatus::Pending {
        return Err(ApprovalError::AlreadyDecided {
            approval_id: approval_id.to_string(),
            status: slot.status,
        });
    }
    if !slot.is_eligible(&approver.role) {
        return Err(ApprovalError::RoleNotEligible {
            role: approver.role.clone(),
            approval_id: approval_id.to_string(),
        });
    }
    if round.two_person_rule
        && round
            .slots
            .iter()
            .any(|s| s.approver.as_deref() == Some(approver.id.as_str()))
    {
        return Err(ApprovalError::DuplicateApprover {
            approver: approver.id.clone(),
            release_id: round.release_id.clone(),
        });
    }
    if round.mode == ApprovalMode::Sequential {
        if let Some(earlier) = round.slots[..idx]
            .iter()
            .find(|s| s.status != ApprovalStatus::Approved)
        {
            return Err(ApprovalError::OutOfOrder {
                approval_id: approval_id.to_string(),
                waiting_on: earlier.id.clone(),
            });
        }
    }

    let slot = &mut round.slots[idx];
    slot.status = match decision {
        ApprovalDecision::Approve => ApprovalStatus::Approved,
        ApprovalDecision::Reject => ApprovalStatus::Rejected,
    };
    slot.approver = Some(approver.id.clone());
    slot.timestamp = Some(now);
    slot.comment = comment;
    let decided = slot.clone();

    evaluate_round(round);
    Ok(decided)
}

/// Recompute the round status from its slots.
pub fn evaluate_round(round: &mut ApprovalRound) -> RoundStatus {
    if round.status.is_closed() {
        return round.status;
    }
    round.status = if round.rejection().is_some() {
        RoundStatus::Rejected
    } else if round.quorum_met() {
        RoundStatus::Approved
    } else {
        RoundStatus::Open
    };
    round.status
}

/// Mark an open round timed out once it is past `expires_at`.
///
/// Returns `true` if the round timed out with this call.
pub fn expire_round(round: &mut ApprovalRound, now: DateTime<Utc>) -> bool {
    if round.status == RoundStatus::Open && round.is_expired_at(now) {
        round.status = RoundStatus::TimedOut;
        return true;
    }
    false
}

/// Force-approve every pending slot.
///
/// Returns the number of slots approved by the bypass.
pub fn bypass(
    round: &mut ApprovalRound,
    policy: &ApprovalPolicy,
    approver: &Approver,
    justification: &str,
    now: DateTime<Utc>,
) -> ApprovalResult<usize> {
    if !policy.may_bypass(&approver.role) {
        return Err(ApprovalError::BypassNotAllowed {
            role: approver.role.clone(),
        });
    }
    let justification = justification.trim();
    if justification.is_empty() {
        return Err(ApprovalError::JustificationRequired);
    }
    if round.status.is_closed() {
        return Err(ApprovalError::RoundClosed {
            round_id: round.round_id.clone(),
            status: round.status,
        });
    }

    let mut forced = 0;
    for slot in round
        .slots
        .iter_mut()
        .filter(|s| s.status == ApprovalStatus::Pending)
    {
        slot.status = ApprovalStatus::Approved;
        slot.approver = Some(approver.id.clone());
        slot.timestamp = Some(now);
        slot.comment = Some(format!("emergency bypass: {justification}"));
        forced += 1;
    }
    round.bypass = Some(BypassRecord {
        approver: approver.clone(),
        justification: justification.to_string(),
        at: now,
    });
    evaluate_round(round);
    Ok(forced)
}
