//! Health sampling and breach detection.
//!
//! Used twice: as the gate between canary cohorts and as the post-deployment
//! observation window that triggers automatic rollback.

use std::collections::BTreeMap;
use std::time::Duration;

use logicdeploy_state::{HealthSample, TargetRuntime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::HealthThresholds;

/// Per-target breach state over a sequence of samples.
#[derive(Debug, Clone)]
pub struct BreachDetector {
    thresholds: HealthThresholds,
    cpu_streak: u32,
    memory_streak: u32,
    errors: u32,
    samples: u32,
    missed: u32,
}

impl BreachDetector {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self {
            thresholds,
            cpu_streak: 0,
            memory_streak: 0,
            errors: 0,
            samples: 0,
            missed: 0,
        }
    }

    /// Feed one sample; returns the breach reason if this sample breaches.
    pub fn observe(&mut self, sample: &HealthSample) -> Option<String> {
        let t = &self.thresholds;
        self.samples += 1;

        self.cpu_streak = if sample.cpu_pct >= t.max_cpu_pct {
            self.cpu_streak + 1
        } else {
            0
        };
        self.memory_streak = if sample.memory_pct >= t.max_memory_pct {
            self.memory_streak + 1
        } else {
            0
        };
        self.errors = self.errors.saturating_add(sample.error_count);

        if t.max_tag_excursions > 0 && sample.critical_tag_excursions >= t.max_tag_excursions {
            return Some(format!(
                "{} critical tag excursion(s)",
                sample.critical_tag_excursions
            ));
        }
        if t.max_critical_failures > 0 && self.errors >= t.max_critical_failures {
            return Some(format!("{} runtime error(s)", self.errors));
        }
        if self.cpu_streak >= t.sustain_samples {
            return Some(format!(
                "cpu at {:.1}% for {} consecutive samples",
                sample.cpu_pct, self.cpu_streak
            ));
        }
        if self.memory_streak >= t.sustain_samples {
            return Some(format!(
                "memory at {:.1}% for {} consecutive samples",
                sample.memory_pct, self.memory_streak
            ));
        }
        None
    }

    /// A sample that could not be read. Never a breach.
    pub fn miss(&mut self) {
        self.missed += 1;
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn missed(&self) -> u32 {
        self.missed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum MonitorOutcome {
    Healthy { samples: u32, missed: u32 },
    Breach { target: String, reason: String },
}

impl MonitorOutcome {
    pub fn is_breach(&self) -> bool {
        matches!(self, Self::Breach { .. })
    }
}

/// Samples a set of targets at a fixed interval.
pub struct HealthMonitor<'a> {
    runtime: &'a dyn TargetRuntime,
    thresholds: HealthThresholds,
    interval: Duration,
    call_timeout: Duration,
}

impl<'a> HealthMonitor<'a> {
    pub fn new(
        runtime: &'a dyn TargetRuntime,
        thresholds: HealthThresholds,
        interval: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            runtime,
            thresholds,
            interval,
            call_timeout,
        }
    }

    /// Take `rounds` samples of every target, waiting one interval before each.
    ///
    /// Stops at the first breach; targets are sampled in the given order.
    pub async fn run(&self, targets: &[String], rounds: u32) -> MonitorOutcome {
        let mut detectors: BTreeMap<&str, BreachDetector> = targets
            .iter()
            .map(|t| (t.as_str(), BreachDetector::new(self.thresholds)))
            .collect();

        for round in 0..rounds {
            tokio::time::sleep(self.interval).await;
            for target in targets {
                let reading =
                    tokio::time::timeout(self.call_timeout, self.runtime.health(target)).await;
                let Some(detector) = detectors.get_mut(target.as_str()) else {
                    continue;
                };
                match reading {
                    Ok(Ok(sample)) => {
                        if let Some(reason) = detector.observe(&sample) {
                            return MonitorOutcome::Breach {
                                target: target.clone(),
                                reason,
                            };
                        }
                    }
                    Ok(Err(e)) => {
                        debug!(target_id = %target, round, error = %e, "health sample missed");
                        detector.miss();
                    }
                    Err(_) => {
                        debug!(target_id = %target, round, "health sample timed out");
                        detector.miss();
                    }
                }
            }
        }

        MonitorOutcome::Healthy {
            samples: detectors.values().map(BreachDetector::samples).sum(),
            missed: detectors.values().map(BreachDetector::missed).sum(),
        }
    }
}

/// Sampling rounds that fit in `window` at `interval`, at least one.
pub fn rounds_for(window: Duration, interval: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    ((window.as_millis() / interval_ms) as u32).max(1)
}
