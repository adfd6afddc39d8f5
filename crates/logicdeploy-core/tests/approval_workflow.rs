//! Approval workflow as seen through the deployment service.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{approve_all, approver_for, config, Harness, RELEASE};
use logicdeploy_core::{
    ApprovalDecision, ApprovalError, Approver, AuditAction, DeploymentStatus, ManualClock,
    PipelineError, RoundStatus, StrategyKind,
};

// ── Scenario C: 2 required approvals, only 1 approved ────────────────────

#[tokio::test]
async fn test_partial_quorum_stays_staging() {
    let h = Harness::new();
    let dep = h.start(StrategyKind::Atomic).await;
    h.service.advance_deployment(&dep.id).await.unwrap();

    let round = h.service.approvals().round(RELEASE).unwrap();
    assert_eq!(round.slots.len(), 2);
    let first = &round.slots[0];
    h.service
        .submit_approval(
            &first.id,
            &approver_for(0, first.approver_role.as_deref()),
            ApprovalDecision::Approve,
            Some("logic reviewed".into()),
        )
        .await
        .unwrap();

    for _ in 0..3 {
        let err = h.service.advance_deployment(&dep.id).await.unwrap_err();
        match err {
            PipelineError::QuorumNotMet {
                approved, required, ..
            } => {
                assert_eq!(approved, 1);
                assert_eq!(required, 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
    let staged = h.service.get_deployment(&dep.id).unwrap();
    assert_eq!(staged.status, DeploymentStatus::Staging);
    assert!(staged.log_contains("approve by approver-0: logic reviewed"));
    assert_eq!(h.runtime.call_count("upload"), 0);
}

#[tokio::test]
async fn test_full_quorum_reaches_ready() {
    let h = Harness::new();
    let dep = h.ready(StrategyKind::Atomic).await;
    assert!(dep.log_contains("quorum met (2/2)"));
    assert!(h.service.approvals().all_approved(RELEASE));
}

#[tokio::test]
async fn test_final_approval_moves_deployment_to_ready() {
    let h = Harness::new();
    let dep = h.start(StrategyKind::Atomic).await;
    h.service.advance_deployment(&dep.id).await.unwrap();
    let round = h.service.approvals().round(RELEASE).unwrap();

    let first = &round.slots[0];
    h.service
        .submit_approval(
            &first.id,
            &approver_for(0, first.approver_role.as_deref()),
            ApprovalDecision::Approve,
            None,
        )
        .await
        .unwrap();
    assert_eq!(
        h.service.get_deployment(&dep.id).unwrap().status,
        DeploymentStatus::Staging
    );

    let last = &round.slots[1];
    h.service
        .submit_approval(
            &last.id,
            &approver_for(1, last.approver_role.as_deref()),
            ApprovalDecision::Approve,
            None,
        )
        .await
        .unwrap();

    // no advance call in between
    let ready = h.service.get_deployment(&dep.id).unwrap();
    assert_eq!(ready.status, DeploymentStatus::Ready);
    assert!(ready.log_contains("quorum met (2/2)"));
    assert_eq!(h.runtime.call_count("upload"), 0);
}

#[tokio::test]
async fn test_rejection_returns_to_queued_with_fresh_round() {
    let h = Harness::new();
    let dep = h.start(StrategyKind::Atomic).await;
    h.service.advance_deployment(&dep.id).await.unwrap();
    let first_round = h.service.approvals().round(RELEASE).unwrap();

    let slot = &first_round.slots[1];
    h.service
        .submit_approval(
            &slot.id,
            &approver_for(1, slot.approver_role.as_deref()),
            ApprovalDecision::Reject,
            Some("wrong recipe table".into()),
        )
        .await
        .unwrap();

    let queued = h.service.get_deployment(&dep.id).unwrap();
    assert_eq!(queued.status, DeploymentStatus::Queued);
    assert!(queued.log_contains("wrong recipe table"));

    // advancing again re-runs the checks and opens a new round
    let staged = h.service.advance_deployment(&dep.id).await.unwrap();
    assert_eq!(staged.status, DeploymentStatus::Staging);
    let second_round = h.service.approvals().round(RELEASE).unwrap();
    assert_ne!(second_round.round_id, first_round.round_id);
    assert_eq!(second_round.status, RoundStatus::Open);
}

#[tokio::test]
async fn test_round_timeout_returns_to_queued() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let h = Harness::with_config(config(), Some(clock.clone()));
    let dep = h.start(StrategyKind::Atomic).await;
    h.service.advance_deployment(&dep.id).await.unwrap();

    clock.advance(Duration::hours(2));

    let err = h.service.advance_deployment(&dep.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::ApprovalTimedOut { .. }));
    let queued = h.service.get_deployment(&dep.id).unwrap();
    assert_eq!(queued.status, DeploymentStatus::Queued);
    assert!(queued.log_contains("timed out"));
}

#[tokio::test]
async fn test_expired_round_requeues_without_advance() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let h = Harness::with_config(config(), Some(clock.clone()));
    let dep = h.start(StrategyKind::Atomic).await;
    h.service.advance_deployment(&dep.id).await.unwrap();

    assert!(h.service.expire_approvals().await.unwrap().is_empty());
    clock.advance(Duration::hours(5));

    let moved = h.service.expire_approvals().await.unwrap();
    assert_eq!(moved.len(), 1);
    let queued = h.service.get_deployment(&dep.id).unwrap();
    assert_eq!(queued.status, DeploymentStatus::Queued);
    assert!(queued.log_contains("timed out"));
    assert_eq!(
        h.service.approvals().round(RELEASE).unwrap().status,
        RoundStatus::TimedOut
    );
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_requeues_expired_rounds() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let h = Harness::with_config(config(), Some(clock.clone()));
    let dep = h.start(StrategyKind::Atomic).await;
    h.service.advance_deployment(&dep.id).await.unwrap();
    let sweeper = h.service.spawn_approval_sweeper(std::time::Duration::from_secs(30));

    clock.advance(Duration::hours(2));
    tokio::time::sleep(std::time::Duration::from_secs(61)).await;

    assert_eq!(
        h.service.get_deployment(&dep.id).unwrap().status,
        DeploymentStatus::Queued
    );
    sweeper.abort();
}

#[tokio::test]
async fn test_same_person_cannot_fill_two_slots() {
    let h = Harness::new();
    let dep = h.start(StrategyKind::Atomic).await;
    h.service.advance_deployment(&dep.id).await.unwrap();
    let round = h.service.approvals().round(RELEASE).unwrap();

    let alice = Approver::new("alice", "controls_engineer");
    h.service
        .submit_approval(&round.slots[0].id, &alice, ApprovalDecision::Approve, None)
        .await
        .unwrap();
    let alice_again = Approver::new("alice", "operations_supervisor");
    let err = h
        .service
        .submit_approval(&round.slots[1].id, &alice_again, ApprovalDecision::Approve, None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Approval(ApprovalError::DuplicateApprover { .. })
    ));
    let dep = h.service.get_deployment(&dep.id).unwrap();
    assert!(dep.log_contains("not recorded"));
}

#[tokio::test]
async fn test_ineligible_role_is_refused() {
    let h = Harness::new();
    let dep = h.start(StrategyKind::Atomic).await;
    h.service.advance_deployment(&dep.id).await.unwrap();
    let round = h.service.approvals().round(RELEASE).unwrap();

    let err = h
        .service
        .submit_approval(
            &round.slots[0].id,
            &Approver::new("visitor", "intern"),
            ApprovalDecision::Approve,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Approval(ApprovalError::RoleNotEligible { .. })
    ));
}

#[tokio::test]
async fn test_emergency_bypass_unblocks_and_is_audited() {
    let h = Harness::new();
    let dep = h.start(StrategyKind::Atomic).await;
    h.service.advance_deployment(&dep.id).await.unwrap();

    let manager = Approver::new("pm-1", "plant_manager");
    let forced = h
        .service
        .emergency_bypass(RELEASE, &manager, "line down, hotfix for conveyor jam")
        .await
        .unwrap();
    assert_eq!(forced, 2);

    let ready = h.service.get_deployment(&dep.id).unwrap();
    assert_eq!(ready.status, DeploymentStatus::Ready);
    assert!(ready.log_contains("emergency bypass by pm-1"));

    let audit = h.service.approvals().audit();
    assert!(audit.verify().is_ok());
    assert!(audit
        .for_release(RELEASE)
        .any(|e| matches!(e.action, AuditAction::Bypass { forced: 2, .. }) && e.actor == "pm-1"));
}

#[tokio::test]
async fn test_bypass_refused_for_other_roles() {
    let h = Harness::new();
    let dep = h.start(StrategyKind::Atomic).await;
    h.service.advance_deployment(&dep.id).await.unwrap();

    let err = h
        .service
        .emergency_bypass(RELEASE, &Approver::new("eng-1", "controls_engineer"), "trust me")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Approval(ApprovalError::BypassNotAllowed { .. })
    ));
    assert!(!h.service.approvals().all_approved(RELEASE));
}

#[tokio::test]
async fn test_rounds_survive_restart() {
    let h = Harness::new();
    let dep = h.start(StrategyKind::Atomic).await;
    h.service.advance_deployment(&dep.id).await.unwrap();
    approve_all(&h.service).await;

    let restarted = h.restarted(None);
    restarted.recover().await.unwrap();

    assert!(restarted.approvals().all_approved(RELEASE));
    assert_eq!(
        restarted.get_deployment(&dep.id).unwrap().status,
        DeploymentStatus::Ready
    );
    let done = restarted.advance_deployment(&dep.id).await.unwrap();
    assert_eq!(done.status, DeploymentStatus::Completed);
}

#[tokio::test]
async fn test_audit_trail_survives_restart() {
    let h = Harness::new();
    let dep = h.start(StrategyKind::Atomic).await;
    h.service.advance_deployment(&dep.id).await.unwrap();
    h.service
        .emergency_bypass(
            RELEASE,
            &Approver::new("pm-1", "plant_manager"),
            "line down, hotfix for conveyor jam",
        )
        .await
        .unwrap();
    let before = h.service.approvals().audit();

    let restarted = h.restarted(None);
    restarted.recover().await.unwrap();

    let after = restarted.approvals().audit();
    assert_eq!(after, before);
    assert!(after.verify().is_ok());
    assert!(after.for_release(RELEASE).any(|e| matches!(
        &e.action,
        AuditAction::Bypass { justification, .. } if justification == "line down, hotfix for conveyor jam"
    ) && e.actor == "pm-1"));
}
