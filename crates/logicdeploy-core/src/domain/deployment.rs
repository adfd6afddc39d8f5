//! Deployment record and its lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Queued,
    Staging,
    Ready,
    Deploying,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl DeploymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine permits `self -> next`.
    ///
    /// Guards on top of the edge (checks, quorum, checkpoint) are enforced
    /// by the orchestrator.
    pub fn can_transition_to(self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        match (self, next) {
            (Queued, Staging) | (Queued, Failed) => true,
            (Staging, Ready) | (Staging, Queued) => true,
            (Ready, Deploying) | (Ready, Queued) | (Ready, Failed) => true,
            (Deploying, Paused) | (Deploying, Completed) | (Deploying, Failed) => true,
            (Paused, Deploying) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Staging => "staging",
            Self::Ready => "ready",
            Self::Deploying => "deploying",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rollout strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Upload, validate and swap on every target at once.
    Atomic,
    /// Cumulative, health-gated cohorts of targets.
    Canary,
    /// File-level chunks applied in dependency order.
    Chunked,
    /// Full stop, apply and restart inside an approved window.
    MaintenanceWindow,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Atomic => "atomic",
            Self::Canary => "canary",
            Self::Chunked => "chunked",
            Self::MaintenanceWindow => "maintenance_window",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "atomic" => Ok(Self::Atomic),
            "canary" => Ok(Self::Canary),
            "chunked" => Ok(Self::Chunked),
            "maintenance" | "maintenance_window" => Ok(Self::MaintenanceWindow),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One append-only progress log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub target: Option<String>,
    pub message: String,
}

/// Why a deployment failed and what the operator should do about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentFailure {
    pub reason: String,
    pub remediation: String,
}

/// Input to `start_deployment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    pub release_id: String,
    pub strategy: StrategyKind,
    /// Targets to roll out to; defaults to the release's target runtimes.
    pub targets: Option<Vec<String>>,
    pub requested_by: String,
}

impl StartRequest {
    pub fn new(
        release_id: impl Into<String>,
        strategy: StrategyKind,
        requested_by: impl Into<String>,
    ) -> Self {
        Self {
            release_id: release_id.into(),
            strategy,
            targets: None,
            requested_by: requested_by.into(),
        }
    }

    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.targets = Some(targets);
        self
    }
}

/// A rollout of one release to its targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub release_id: String,
    pub strategy: StrategyKind,
    pub status: DeploymentStatus,
    pub requested_by: String,
    pub created_at: DateTime<Utc>,
    /// When the deployment entered `deploying` for the first time.
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub targets: Vec<String>,
    pub progress_log: Vec<ProgressEntry>,
    pub percent: u8,
    pub safety_run_id: Option<String>,
    pub approval_round_id: Option<String>,
    pub checkpoint_id: Option<String>,
    pub rollback_id: Option<String>,
    pub failure: Option<DeploymentFailure>,
}

impl Deployment {
    pub fn new(id: impl Into<String>, request: &StartRequest, targets: Vec<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            release_id: request.release_id.clone(),
            strategy: request.strategy,
            status: DeploymentStatus::Queued,
            requested_by: request.requested_by.clone(),
            created_at: now,
            started_at: None,
            finished_at: None,
            targets,
            progress_log: Vec::new(),
            percent: 0,
            safety_run_id: None,
            approval_round_id: None,
            checkpoint_id: None,
            rollback_id: None,
            failure: None,
        }
    }

    /// Append a log line.
    pub fn log(
        &mut self,
        level: LogLevel,
        target: Option<&str>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> &ProgressEntry {
        self.progress_log.push(ProgressEntry {
            at: now,
            level,
            target: target.map(str::to_string),
            message: message.into(),
        });
        &self.progress_log[self.progress_log.len() - 1]
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Whether any log line contains `needle`.
    pub fn log_contains(&self, needle: &str) -> bool {
        self.progress_log.iter().any(|e| e.message.contains(needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeploymentStatus::*;

    #[test]
    fn test_happy_path_edges() {
        assert!(Queued.can_transition_to(Staging));
        assert!(Staging.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Deploying));
        assert!(Deploying.can_transition_to(Completed));
    }

    #[test]
    fn test_pause_resume_edges() {
        assert!(Deploying.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Deploying));
        assert!(!Paused.can_transition_to(Completed));
        assert!(!Ready.can_transition_to(Paused));
    }

    #[test]
    fn test_no_skipping_guards() {
        assert!(!Queued.can_transition_to(Ready));
        assert!(!Queued.can_transition_to(Deploying));
        assert!(!Staging.can_transition_to(Deploying));
    }

    #[test]
    fn test_cancel_only_from_non_terminal() {
        for s in [Queued, Staging, Ready, Deploying, Paused] {
            assert!(s.can_transition_to(Cancelled), "{s}");
        }
        for s in [Completed, Failed, Cancelled] {
            assert!(!s.can_transition_to(Cancelled), "{s}");
            assert!(s.is_terminal());
        }
    }

    #[test]
    fn test_timeout_reverts_to_queued() {
        assert!(Staging.can_transition_to(Queued));
        assert!(Ready.can_transition_to(Queued));
        assert!(!Deploying.can_transition_to(Queued));
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("canary".parse::<StrategyKind>(), Ok(StrategyKind::Canary));
        assert_eq!(
            "maintenance".parse::<StrategyKind>(),
            Ok(StrategyKind::MaintenanceWindow)
        );
        assert!("bluegreen".parse::<StrategyKind>().is_err());
    }
}
