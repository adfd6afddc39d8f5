//! logicdeploy Core Library
//!
//! Approval workflow, deployment orchestration, checkpoints and rollback
//! for control-logic releases. Safety checks live in `logicdeploy-safety`,
//! external ports and persistence in `logicdeploy-state`.

pub mod approvals;
pub mod config;
pub mod domain;
pub mod metrics;
pub mod monitor;
pub mod obs;
pub mod orchestrator;
pub mod rollback;
pub mod telemetry;

pub use approvals::{
    read_audit_trail, write_audit_trail, ApprovalDecision, ApprovalError, ApprovalManager,
    ApprovalMode, ApprovalPolicy, ApprovalRound, ApprovalStatus, Approver, AuditAction,
    AuditEntry, AuditTrail, DeployApproval, RoundStatus,
};

pub use config::{
    CanaryConfig, HealthThresholds, MaintenanceConfig, MonitoringConfig, PipelineConfig,
    RetentionConfig, RuntimeConfig,
};

pub use domain::{
    Checkpoint, Deployment, DeploymentFailure, DeploymentStatus, LogLevel, PipelineError,
    PipelineResult, ProgressEntry, Rollback, RollbackStatus, StartRequest, StrategyKind,
};

pub use monitor::{BreachDetector, HealthMonitor, MonitorOutcome};

pub use orchestrator::{
    plan_chunks, ChunkPlan, Clock, Collaborators, DeploymentEvent, DeploymentService, ManualClock,
    SystemClock,
};

pub use rollback::CheckpointManager;

pub use logicdeploy_safety::{CheckKind, CheckUpdate, ExtractedFacts, SafetyRun};
pub use logicdeploy_state::{ReleaseRecord, Snapshot};
