//! Shared fixture: a deployment service wired to in-memory collaborators.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use logicdeploy_core::{
    ApprovalDecision, Approver, Clock, Collaborators, Deployment, DeploymentService,
    DeploymentStatus, PipelineConfig, StartRequest, StrategyKind,
};
use logicdeploy_state::fakes::{
    MemoryPipelineStore, MemoryTagDatabase, MemoryTargetRuntime, MemoryVersioningCenter,
};
use logicdeploy_state::{
    CriticalTag, LogicFile, ReleaseMetadata, ReleaseRecord, ReleaseStage, RemoteState, Snapshot,
    VendorDialect,
};

pub const RELEASE: &str = "rel-1";
pub const TARGETS: &[&str] = &["plc-1", "plc-2"];

const LINE: &[(&str, &str)] = &[
    (
        "globals.st",
        "VAR_GLOBAL\n  E_Stop AT %IX0.0 : BOOL;\n  Motor_Run AT %QX0.0 : BOOL;\nEND_VAR",
    ),
    (
        "motor.st",
        "FUNCTION_BLOCK MotorCtl\nVAR_INPUT Enable : BOOL; END_VAR\nVAR_OUTPUT Run : BOOL; END_VAR\n\
         Run := Enable;\nEND_FUNCTION_BLOCK",
    ),
    (
        "main.st",
        "PROGRAM Main\nVAR Ctl : MotorCtl; END_VAR\n\
         Ctl(Enable := NOT E_Stop, Run => Motor_Run);\nEND_PROGRAM",
    ),
];

pub fn ts() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
}

pub fn release(targets: &[&str]) -> ReleaseRecord {
    ReleaseRecord {
        release_id: RELEASE.into(),
        project_id: "line-1".into(),
        version_id: "ver-2".into(),
        snapshot_id: "snap-2".into(),
        stage: ReleaseStage::Production,
        created_by: "engineer".into(),
        created_at: ts(),
        metadata: ReleaseMetadata {
            target_runtimes: targets.iter().map(|t| t.to_string()).collect(),
            priority: 1,
        },
    }
}

/// Fast runtime calls, two canary cohorts and a short observation window.
pub fn config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.approval.warning_escalation = 0;
    config.runtime.call_timeout_ms = 1_000;
    config.runtime.requery_attempts = 1;
    config.runtime.requery_delay_ms = 10;
    config.canary.cohorts = vec![50, 100];
    config.canary.samples_per_cohort = 2;
    config.canary.sample_interval_ms = 100;
    config.monitoring.window_secs = 1;
    config.monitoring.sample_interval_ms = 200;
    config
}

pub struct Harness {
    pub service: Arc<DeploymentService>,
    pub runtime: Arc<MemoryTargetRuntime>,
    pub store: Arc<MemoryPipelineStore>,
    pub versioning: Arc<MemoryVersioningCenter>,
    pub tags: Arc<MemoryTagDatabase>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(config(), None)
    }

    pub fn with_config(config: PipelineConfig, clock: Option<Arc<dyn Clock>>) -> Self {
        let versioning = Arc::new(MemoryVersioningCenter::new());
        let files = LINE
            .iter()
            .map(|(p, c)| LogicFile::new(*p, VendorDialect::Iec61131, *c, ts()))
            .collect();
        versioning.insert_snapshot(Snapshot::new("snap-2", "ver-2", files));
        versioning.insert_release(release(TARGETS));

        let tags = Arc::new(MemoryTagDatabase::new());
        tags.set_tags(
            "line-1",
            vec![CriticalTag::new("E_Stop", Some("%IX0.0"), "emergency stop chain")],
        );

        let runtime = Arc::new(MemoryTargetRuntime::new());
        for target in TARGETS {
            runtime.add_target(
                target,
                RemoteState {
                    active_snapshot: Some("snap-1".into()),
                    running: true,
                    ..RemoteState::default()
                },
            );
        }

        let store = Arc::new(MemoryPipelineStore::new());
        let service = DeploymentService::new(
            Collaborators {
                versioning: versioning.clone(),
                tags: tags.clone(),
                runtime: runtime.clone(),
                store: store.clone(),
            },
            config,
        );
        let service = Arc::new(match clock {
            Some(clock) => service.with_clock(clock),
            None => service,
        });
        Self {
            service,
            runtime,
            store,
            versioning,
            tags,
        }
    }

    /// A second service over the same collaborators, as after a restart.
    pub fn restarted(&self, clock: Option<Arc<dyn Clock>>) -> DeploymentService {
        let service = DeploymentService::new(
            Collaborators {
                versioning: self.versioning.clone(),
                tags: self.tags.clone(),
                runtime: self.runtime.clone(),
                store: self.store.clone(),
            },
            self.service.config().clone(),
        );
        match clock {
            Some(clock) => service.with_clock(clock),
            None => service,
        }
    }

    pub async fn start(&self, strategy: StrategyKind) -> Deployment {
        self.service
            .start_deployment(StartRequest::new(RELEASE, strategy, "operator"))
            .await
            .unwrap()
    }

    /// Queue a deployment and drive it to `ready` with every slot approved.
    pub async fn ready(&self, strategy: StrategyKind) -> Deployment {
        let dep = self.start(strategy).await;
        let staged = self.service.advance_deployment(&dep.id).await.unwrap();
        assert_eq!(staged.status, DeploymentStatus::Staging);
        approve_all(&self.service).await;
        let ready = self.service.get_deployment(&dep.id).unwrap();
        assert_eq!(ready.status, DeploymentStatus::Ready);
        ready
    }

    pub fn active_snapshot(&self, target: &str) -> Option<String> {
        self.runtime.state(target).and_then(|s| s.active_snapshot)
    }

    pub fn calls_on(&self, target: &str, operation: &str) -> usize {
        self.runtime
            .calls()
            .iter()
            .filter(|c| c.target == target && c.operation == operation)
            .count()
    }
}

/// Approver able to fill a slot raised for `role` (open slots get a safety engineer).
pub fn approver_for(position: usize, role: Option<&str>) -> Approver {
    let role = role.unwrap_or("safety_engineer");
    Approver::new(format!("approver-{position}"), role)
}

/// Approve every pending slot of the current round, in slot order.
pub async fn approve_all(service: &DeploymentService) {
    let round = service.approvals().round(RELEASE).expect("open round");
    for slot in &round.slots {
        service
            .submit_approval(
                &slot.id,
                &approver_for(slot.position, slot.approver_role.as_deref()),
                ApprovalDecision::Approve,
                None,
            )
            .await
            .unwrap();
    }
}
