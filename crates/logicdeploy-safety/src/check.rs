//! Safety check definitions and run results.

use chrono::{DateTime, Utc};
use logicdeploy_state::ContentDigest;
use serde::{Deserialize, Serialize};

/// Builtin safety checks, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Block structure and presence of logic
    Syntax,

    /// Declaration validity
    Declarations,

    /// Writes to or remapping of critical tags
    CriticalTags,

    /// Memory and code size estimate
    Resources,

    /// More than one unarbitrated writer per output
    RaceConditions,

    /// Address/identifier mapping conflicts
    IoConflicts,

    /// Export file validity per target
    VendorExport,

    /// Runtime lock and maintenance window availability
    RuntimeLock,
}

impl CheckKind {
    /// All checks in the fixed execution order.
    pub const ALL: [CheckKind; 8] = [
        CheckKind::Syntax,
        CheckKind::Declarations,
        CheckKind::CriticalTags,
        CheckKind::Resources,
        CheckKind::RaceConditions,
        CheckKind::IoConflicts,
        CheckKind::VendorExport,
        CheckKind::RuntimeLock,
    ];

    /// Get the check name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            CheckKind::Syntax => "syntax",
            CheckKind::Declarations => "declarations",
            CheckKind::CriticalTags => "critical_tags",
            CheckKind::Resources => "resources",
            CheckKind::RaceConditions => "race_conditions",
            CheckKind::IoConflicts => "io_conflicts",
            CheckKind::VendorExport => "vendor_export",
            CheckKind::RuntimeLock => "runtime_lock",
        }
    }

    /// Severity a failure of this check carries.
    pub fn severity(&self) -> CheckSeverity {
        CheckSeverity::Critical
    }
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CheckSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Warning,
}

impl CheckStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Passed | Self::Failed | Self::Warning)
    }
}

/// One validator result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SafetyCheck {
    pub id: String,
    pub kind: CheckKind,
    pub name: String,
    pub severity: CheckSeverity,
    pub status: CheckStatus,
    pub message: String,
    pub details: Vec<String>,
}

impl SafetyCheck {
    pub fn pending(run_id: &str, kind: CheckKind) -> Self {
        Self {
            id: format!("{run_id}:{}", kind.name()),
            kind,
            name: kind.name().to_string(),
            severity: kind.severity(),
            status: CheckStatus::Pending,
            message: String::new(),
            details: Vec::new(),
        }
    }

    /// A failed check that must stop the release.
    pub fn is_blocking(&self) -> bool {
        self.severity == CheckSeverity::Critical
            && matches!(
                self.status,
                CheckStatus::Failed | CheckStatus::Pending | CheckStatus::Running
            )
    }
}

/// Incremental update streamed while a run executes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckUpdate {
    pub run_id: String,
    /// Position of the check in execution order.
    pub index: usize,
    pub check: SafetyCheck,
}

/// The complete result set of one safety run. A re-run supersedes it wholesale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SafetyRun {
    pub run_id: String,
    pub release_id: String,
    pub snapshot_digest: ContentDigest,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub checks: Vec<SafetyCheck>,
}

impl SafetyRun {
    /// Every check reached a terminal status.
    pub fn all_evaluated(&self) -> bool {
        self.checks.iter().all(|c| c.status.is_terminal())
    }

    /// Whether any critical check failed or never finished.
    pub fn is_blocked(&self) -> bool {
        self.checks.iter().any(SafetyCheck::is_blocking)
    }

    /// Every critical check passed outright.
    pub fn critical_all_passed(&self) -> bool {
        self.all_evaluated()
            && self
                .checks
                .iter()
                .filter(|c| c.severity == CheckSeverity::Critical)
                .all(|c| matches!(c.status, CheckStatus::Passed | CheckStatus::Warning))
    }

    pub fn warning_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Warning)
            .count()
    }

    pub fn check(&self, kind: CheckKind) -> Option<&SafetyCheck> {
        self.checks.iter().find(|c| c.kind == kind)
    }
}
