//! Explicit inputs of a safety run besides the extracted facts.

use chrono::{DateTime, Duration, Utc};
use logicdeploy_state::{CriticalTag, ReleaseRecord, RuntimeLock, VendorDialect};
use serde::{Deserialize, Serialize};

/// Size limits a target can hold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    pub max_data_bytes: u64,
    pub max_code_bytes: u64,
    /// Fraction of a limit above which the check warns.
    pub warn_ratio: f64,
    /// Estimated code bytes per statement line.
    pub code_bytes_per_statement: u64,
    /// Largest accepted export file.
    pub max_file_bytes: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_data_bytes: 256 * 1024,
            max_code_bytes: 1024 * 1024,
            warn_ratio: 0.8,
            code_bytes_per_statement: 24,
            max_file_bytes: 4 * 1024 * 1024,
        }
    }
}

/// What the checks know about one deployment target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetProfile {
    pub target_id: String,
    pub supported_dialects: Vec<VendorDialect>,
    pub lock: RuntimeLock,
}

impl TargetProfile {
    /// A target that accepts every dialect and holds no lock.
    pub fn open(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            supported_dialects: vec![VendorDialect::Iec61131, VendorDialect::SiemensScl],
            lock: RuntimeLock::default(),
        }
    }
}

/// Read-only context handed to every rule.
#[derive(Debug, Clone)]
pub struct CheckContext {
    pub release: ReleaseRecord,
    pub critical_tags: Vec<CriticalTag>,
    pub targets: Vec<TargetProfile>,
    pub limits: ResourceLimits,
    /// Identity the pipeline holds runtime locks under.
    pub deployer: String,
    /// The rollout needs an approved maintenance window.
    pub requires_maintenance_window: bool,
    /// How long a maintenance rollout may wait for its window.
    pub maintenance_wait: Duration,
    /// Instant the checks evaluate time-dependent rules at.
    pub evaluated_at: DateTime<Utc>,
}

impl CheckContext {
    pub fn new(release: ReleaseRecord, evaluated_at: DateTime<Utc>) -> Self {
        let targets = release
            .metadata
            .target_runtimes
            .iter()
            .map(TargetProfile::open)
            .collect();
        Self {
            release,
            critical_tags: Vec::new(),
            targets,
            limits: ResourceLimits::default(),
            deployer: "logicdeploy".to_string(),
            requires_maintenance_window: false,
            maintenance_wait: Duration::zero(),
            evaluated_at,
        }
    }

    pub fn with_critical_tags(mut self, tags: Vec<CriticalTag>) -> Self {
        self.critical_tags = tags;
        self
    }

    pub fn with_targets(mut self, targets: Vec<TargetProfile>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_deployer(mut self, deployer: impl Into<String>) -> Self {
        self.deployer = deployer.into();
        self
    }

    pub fn with_maintenance_window(mut self, wait: Duration) -> Self {
        self.requires_maintenance_window = true;
        self.maintenance_wait = wait;
        self
    }
}
