//! Pipeline configuration.
//!
//! Every section has production defaults; a TOML file only needs the keys it
//! overrides.

use std::path::Path;
use std::time::Duration;

use logicdeploy_safety::ResourceLimits;
use logicdeploy_state::VendorDialect;
use serde::{Deserialize, Serialize};

use crate::approvals::ApprovalPolicy;
use crate::domain::{PipelineError, PipelineResult};

/// Health limits applied to target samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    pub max_cpu_pct: f64,
    pub max_memory_pct: f64,
    /// Consecutive samples at or above a CPU/memory limit that count as a breach.
    pub sustain_samples: u32,
    /// Cumulative runtime faults that count as a breach.
    pub max_critical_failures: u32,
    /// Critical-tag excursions in one sample that count as a breach.
    pub max_tag_excursions: u32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_cpu_pct: 90.0,
            max_memory_pct: 90.0,
            sustain_samples: 3,
            max_critical_failures: 1,
            max_tag_excursions: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanaryConfig {
    /// Cumulative percentage of targets reached after each cohort.
    pub cohorts: Vec<u8>,
    pub samples_per_cohort: u32,
    pub sample_interval_ms: u64,
    pub thresholds: HealthThresholds,
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            cohorts: vec![10, 50, 100],
            samples_per_cohort: 3,
            sample_interval_ms: 1_000,
            thresholds: HealthThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Length of the post-deployment observation window.
    pub window_secs: u64,
    pub sample_interval_ms: u64,
    pub thresholds: HealthThresholds,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            window_secs: 300,
            sample_interval_ms: 5_000,
            thresholds: HealthThresholds::default(),
        }
    }
}

impl MonitoringConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// How long a completed deployment stays rollback-able.
    pub retain_for_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retain_for_secs: 7 * 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Deadline for a single target runtime call.
    pub call_timeout_ms: u64,
    /// Re-queries of remote state after a timed-out call.
    pub requery_attempts: u32,
    pub requery_delay_ms: u64,
    /// Identity runtime locks are held under.
    pub deployer: String,
    pub supported_dialects: Vec<VendorDialect>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 30_000,
            requery_attempts: 3,
            requery_delay_ms: 1_000,
            deployer: "logicdeploy".to_string(),
            supported_dialects: vec![VendorDialect::Iec61131, VendorDialect::SiemensScl],
        }
    }
}

impl RuntimeConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn requery_delay(&self) -> Duration {
        Duration::from_millis(self.requery_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// How long a maintenance rollout waits for its window to open.
    pub max_wait_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            max_wait_secs: 3_600,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub approval: ApprovalPolicy,
    pub canary: CanaryConfig,
    pub monitoring: MonitoringConfig,
    pub retention: RetentionConfig,
    pub runtime: RuntimeConfig,
    pub limits: ResourceLimits,
    pub maintenance: MaintenanceConfig,
}

impl PipelineConfig {
    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> PipelineResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the orchestrator cannot run with.
    pub fn validate(&self) -> PipelineResult<()> {
        let cohorts = &self.canary.cohorts;
        if cohorts.is_empty() {
            return Err(PipelineError::Config("canary.cohorts must not be empty".into()));
        }
        if cohorts.windows(2).any(|w| w[0] >= w[1]) {
            return Err(PipelineError::Config(
                "canary.cohorts must be strictly increasing".into(),
            ));
        }
        if cohorts.last() != Some(&100) {
            return Err(PipelineError::Config("canary.cohorts must end at 100".into()));
        }
        if cohorts[0] == 0 {
            return Err(PipelineError::Config("canary.cohorts must start above 0".into()));
        }
        if self.runtime.call_timeout_ms == 0 {
            return Err(PipelineError::Config("runtime.call_timeout_ms must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.limits.warn_ratio) {
            return Err(PipelineError::Config("limits.warn_ratio must be within 0..=1".into()));
        }
        for t in [&self.canary.thresholds, &self.monitoring.thresholds] {
            if t.sustain_samples == 0 {
                return Err(PipelineError::Config("thresholds.sustain_samples must be positive".into()));
            }
        }
        if self.approval.allow_bypass && self.approval.bypass_roles.is_empty() {
            return Err(PipelineError::Config(
                "approval.bypass_roles must name at least one role when bypass is allowed".into(),
            ));
        }
        Ok(())
    }
}
