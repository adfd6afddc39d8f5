//! Deployment lifecycle through the service: start, advance, roll out,
//! fail, roll back, pause, cancel and recover.

mod common;

use std::time::Duration;

use common::{Harness, RELEASE, TARGETS};
use logicdeploy_core::{
    DeploymentStatus, LogLevel, PipelineError, RollbackStatus, StartRequest, StrategyKind,
};
use logicdeploy_state::fakes::RuntimeFault;
use logicdeploy_state::{MaintenanceWindow, PipelineStore, RecordKind, RuntimeLock};

#[tokio::test]
async fn test_atomic_rollout_completes() {
    let h = Harness::new();
    let dep = h.ready(StrategyKind::Atomic).await;

    let done = h.service.advance_deployment(&dep.id).await.unwrap();

    assert_eq!(done.status, DeploymentStatus::Completed);
    assert_eq!(done.percent, 100);
    assert!(done.started_at.is_some());
    assert!(done.finished_at.is_some());
    assert!(done.checkpoint_id.is_some());
    for target in TARGETS {
        assert_eq!(h.active_snapshot(target).as_deref(), Some("snap-2"));
    }
    assert!(h.service.active_deployment(RELEASE).is_none());

    let stored = h
        .store
        .get(RecordKind::Deployment, &dep.id)
        .await
        .unwrap()
        .expect("persisted deployment");
    let stored: logicdeploy_core::Deployment = stored.decode().unwrap();
    assert_eq!(stored, done);
}

#[tokio::test]
async fn test_unknown_release_is_rejected() {
    let h = Harness::new();
    let err = h
        .service
        .start_deployment(StartRequest::new("rel-404", StrategyKind::Atomic, "operator"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::ReleaseNotFound(_)));
}

#[tokio::test]
async fn test_duplicate_targets_are_collapsed() {
    let h = Harness::new();
    let dep = h
        .service
        .start_deployment(
            StartRequest::new(RELEASE, StrategyKind::Atomic, "operator").with_targets(vec![
                "plc-2".into(),
                "plc-1".into(),
                "plc-2".into(),
            ]),
        )
        .await
        .unwrap();
    assert_eq!(dep.targets, vec!["plc-2".to_string(), "plc-1".to_string()]);
}

#[tokio::test]
async fn test_concurrent_starts_yield_one_deployment() {
    let h = Harness::new();
    let request = StartRequest::new(RELEASE, StrategyKind::Atomic, "operator");

    let (a, b) = tokio::join!(
        h.service.start_deployment(request.clone()),
        h.service.start_deployment(request.clone())
    );

    let (ok, err) = match (a, b) {
        (Ok(dep), Err(e)) | (Err(e), Ok(dep)) => (dep, e),
        other => panic!("expected exactly one start to succeed: {other:?}"),
    };
    match err {
        PipelineError::ActiveDeploymentExists { deployment_id, .. } => {
            assert_eq!(deployment_id, ok.id)
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn test_new_deployment_allowed_after_terminal() {
    let h = Harness::new();
    let dep = h.start(StrategyKind::Atomic).await;
    h.service.cancel_deployment(&dep.id).await.unwrap();

    let next = h.start(StrategyKind::Atomic).await;
    assert_ne!(next.id, dep.id);
}

// ── Scenario D: runtime error mid-deploying ──────────────────────────────

#[tokio::test]
async fn test_runtime_error_fails_and_rolls_back() {
    let h = Harness::new();
    h.runtime
        .script_fault("plc-2", "activate", RuntimeFault::Reject("checksum mismatch".into()));
    let dep = h.ready(StrategyKind::Atomic).await;

    let err = h.service.advance_deployment(&dep.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::Runtime(_)));

    let failed = h.service.get_deployment(&dep.id).unwrap();
    assert_eq!(failed.status, DeploymentStatus::Failed);
    let failure = failed.failure.as_ref().expect("failure recorded");
    assert!(failure.reason.contains("checksum mismatch"));

    let rollback = h
        .service
        .checkpoints()
        .rollback_for(&dep.id)
        .expect("automatic rollback");
    assert_eq!(Some(&rollback.checkpoint_id), failed.checkpoint_id.as_ref());
    assert_eq!(rollback.status, RollbackStatus::Completed);
    assert_eq!(rollback.initiated_by, "system");
    assert_eq!(failed.rollback_id.as_deref(), Some(rollback.id.as_str()));

    // plc-1 had already switched; the checkpoint puts it back
    assert_eq!(h.active_snapshot("plc-1").as_deref(), Some("snap-1"));
    assert_eq!(h.active_snapshot("plc-2").as_deref(), Some("snap-1"));
    assert!(failed
        .progress_log
        .iter()
        .any(|e| e.level == LogLevel::Error && e.message.contains("checksum mismatch")));
}

#[tokio::test]
async fn test_operator_rollback_is_idempotent() {
    let h = Harness::new();
    let dep = h.ready(StrategyKind::Atomic).await;
    h.service.advance_deployment(&dep.id).await.unwrap();

    let first = h
        .service
        .execute_rollback(&dep.id, "supervisor", "line stoppage")
        .await
        .unwrap();
    let restores = h.runtime.call_count("restore");
    let second = h
        .service
        .execute_rollback(&dep.id, "supervisor", "line stoppage")
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(h.runtime.call_count("restore"), restores);
    assert_eq!(restores, TARGETS.len());
    assert_eq!(h.active_snapshot("plc-1").as_deref(), Some("snap-1"));
}

#[tokio::test]
async fn test_rollback_unavailable_before_deploying() {
    let h = Harness::new();
    let dep = h.start(StrategyKind::Atomic).await;
    let err = h
        .service
        .execute_rollback(&dep.id, "supervisor", "changed my mind")
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::RollbackUnavailable { .. }));
}

#[tokio::test]
async fn test_checkpoint_failure_blocks_deploying() {
    let h = Harness::new();
    let dep = h.ready(StrategyKind::Atomic).await;
    h.runtime
        .script_fault("plc-2", "query_state", RuntimeFault::Disconnect);

    let err = h.service.advance_deployment(&dep.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::CheckpointFailed { .. }));

    let failed = h.service.get_deployment(&dep.id).unwrap();
    assert_eq!(failed.status, DeploymentStatus::Failed);
    assert!(failed.started_at.is_none());
    assert_eq!(h.runtime.call_count("upload"), 0);
}

// ── Timeouts settled by re-query ─────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_timed_out_activate_confirmed_by_requery() {
    let h = Harness::new();
    h.runtime
        .script_fault("plc-1", "activate", RuntimeFault::Timeout { applied: true });
    let dep = h.ready(StrategyKind::Atomic).await;

    let done = h.service.advance_deployment(&dep.id).await.unwrap();

    assert_eq!(done.status, DeploymentStatus::Completed);
    assert!(done.log_contains("activate timed out; re-query confirmed it took effect"));
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_activate_not_applied_fails() {
    let h = Harness::new();
    h.runtime
        .script_fault("plc-1", "activate", RuntimeFault::Timeout { applied: false });
    let dep = h.ready(StrategyKind::Atomic).await;

    let err = h.service.advance_deployment(&dep.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::Runtime(_)));
    assert_eq!(
        h.service.get_deployment(&dep.id).unwrap().status,
        DeploymentStatus::Failed
    );
    // nothing switched, nothing partial is left behind
    assert_eq!(h.active_snapshot("plc-1").as_deref(), Some("snap-1"));
    assert_eq!(h.calls_on("plc-2", "activate"), 0);
}

// ── Pause, resume, cancel ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_pause_parks_at_boundary_then_resumes() {
    let h = Harness::new();
    h.runtime.set_latency(Duration::from_millis(500));
    let dep = h.ready(StrategyKind::Atomic).await;

    let service = h.service.clone();
    let id = dep.id.clone();
    let run = tokio::spawn(async move { service.advance_deployment(&id).await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    let paused = h.service.pause_deployment(&dep.id).await.unwrap();
    assert_eq!(paused.status, DeploymentStatus::Paused);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let parked = h.service.get_deployment(&dep.id).unwrap();
    assert_eq!(parked.status, DeploymentStatus::Paused);
    assert!(parked.log_contains("paused at step boundary"));
    assert_eq!(h.runtime.call_count("activate"), 0);

    h.service.resume_deployment(&dep.id).await.unwrap();
    let done = run.await.unwrap().unwrap();
    assert_eq!(done.status, DeploymentStatus::Completed);
    assert_eq!(h.runtime.call_count("activate"), TARGETS.len());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_deploying_rolls_back() {
    let h = Harness::new();
    h.runtime.set_latency(Duration::from_millis(500));
    let dep = h.ready(StrategyKind::Canary).await;

    let service = h.service.clone();
    let id = dep.id.clone();
    let run = tokio::spawn(async move { service.advance_deployment(&id).await });

    // cohort 1 (plc-1) is activated and under observation
    tokio::time::sleep(Duration::from_millis(1_600)).await;
    assert_eq!(h.active_snapshot("plc-1").as_deref(), Some("snap-2"));
    h.service.cancel_deployment(&dep.id).await.unwrap();

    let cancelled = run.await.unwrap().unwrap();
    assert_eq!(cancelled.status, DeploymentStatus::Cancelled);
    assert!(cancelled.rollback_id.is_some());
    assert!(cancelled.log_contains("cancel requested"));
    assert_eq!(h.active_snapshot("plc-1").as_deref(), Some("snap-1"));
    assert_eq!(h.calls_on("plc-2", "activate"), 0);
}

#[tokio::test]
async fn test_cancel_before_deploying_is_immediate() {
    let h = Harness::new();
    let dep = h.start(StrategyKind::Atomic).await;
    h.service.advance_deployment(&dep.id).await.unwrap();

    let cancelled = h.service.cancel_deployment(&dep.id).await.unwrap();
    assert_eq!(cancelled.status, DeploymentStatus::Cancelled);
    assert!(cancelled.rollback_id.is_none());
    assert!(h.runtime.calls().iter().all(|c| c.operation != "upload"));

    let err = h.service.advance_deployment(&dep.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_events_stream_to_completion() {
    let h = Harness::new();
    let dep = h.ready(StrategyKind::Atomic).await;
    let mut rx = h.service.subscribe(&dep.id);

    h.service.advance_deployment(&dep.id).await.unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(events.iter().any(|e| e.status == DeploymentStatus::Deploying));
    let last = events.last().expect("events");
    assert_eq!(last.status, DeploymentStatus::Completed);
    assert_eq!(last.percent, 100);
    assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
}

// ── Other strategies ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_chunked_rollout_applies_every_file() {
    let h = Harness::new();
    let dep = h.ready(StrategyKind::Chunked).await;

    let done = h.service.advance_deployment(&dep.id).await.unwrap();

    assert_eq!(done.status, DeploymentStatus::Completed);
    assert!(done.log_contains("planned 3 chunk(s)"));
    assert_eq!(h.runtime.call_count("apply_chunk"), 3 * TARGETS.len());
    for target in TARGETS {
        assert_eq!(h.runtime.state(target).unwrap().chunks.len(), 3);
    }
}

fn open_window() -> RuntimeLock {
    let now = chrono::Utc::now();
    RuntimeLock {
        holder: None,
        windows: vec![MaintenanceWindow {
            starts_at: now - chrono::Duration::minutes(5),
            ends_at: now + chrono::Duration::hours(1),
            approved: true,
        }],
    }
}

#[tokio::test]
async fn test_maintenance_rollout_inside_window() {
    let h = Harness::new();
    for target in TARGETS {
        h.runtime.set_lock(target, open_window());
    }
    let dep = h.ready(StrategyKind::MaintenanceWindow).await;

    let done = h.service.advance_deployment(&dep.id).await.unwrap();

    assert_eq!(done.status, DeploymentStatus::Completed);
    assert_eq!(h.runtime.call_count("quiesce"), TARGETS.len());
    assert_eq!(h.runtime.call_count("restart"), TARGETS.len());
    for target in TARGETS {
        let state = h.runtime.state(target).unwrap();
        assert!(state.running);
        assert_eq!(state.active_snapshot.as_deref(), Some("snap-2"));
    }
}

#[tokio::test]
async fn test_maintenance_rollout_without_window_fails_checks() {
    let h = Harness::new();
    let dep = h.start(StrategyKind::MaintenanceWindow).await;

    let err = h.service.advance_deployment(&dep.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::CheckFailed { .. }));

    let failed = h.service.get_deployment(&dep.id).unwrap();
    assert_eq!(failed.status, DeploymentStatus::Failed);
    assert!(failed.safety_run_id.is_some());
    assert!(h.service.approvals().round(RELEASE).is_none());
}

// ── Restart recovery ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_interrupted_rollout_recovers_as_paused() {
    let h = Harness::new();
    h.runtime.set_latency(Duration::from_millis(500));
    let dep = h.ready(StrategyKind::Chunked).await;

    let service = h.service.clone();
    let id = dep.id.clone();
    let run = tokio::spawn(async move { service.advance_deployment(&id).await });
    // first level applied on plc-1, then the process dies
    tokio::time::sleep(Duration::from_millis(700)).await;
    run.abort();
    let _ = run.await;

    let restarted = h.restarted(None);
    assert_eq!(restarted.recover().await.unwrap(), 1);

    let recovered = restarted.get_deployment(&dep.id).unwrap();
    assert_eq!(recovered.status, DeploymentStatus::Paused);
    assert!(recovered.log_contains("interrupted by a restart"));
    assert!(restarted.approvals().all_approved(RELEASE));

    let resumed = restarted.resume_deployment(&dep.id).await.unwrap();
    assert!(resumed.log_contains("advance the deployment to continue"));
    let applied_before = h.runtime.call_count("apply_chunk");

    let done = restarted.advance_deployment(&dep.id).await.unwrap();
    assert_eq!(done.status, DeploymentStatus::Completed);
    assert!(done.log_contains("already applied"));
    assert_eq!(
        h.runtime.call_count("apply_chunk") - applied_before,
        3 * TARGETS.len() - applied_before
    );
}
