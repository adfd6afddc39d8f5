//! Canary rollout: cumulative cohorts, each gated on target health.

use std::time::Duration;

use async_trait::async_trait;

use super::{percent, Rollout, RolloutError, RolloutStrategy};
use crate::domain::{LogLevel, PipelineError, StrategyKind};
use crate::metrics::METRICS;
use crate::monitor::{HealthMonitor, MonitorOutcome};
use crate::obs;

pub struct CanaryRollout;

/// Targets covered after each cohort. Every cohort adds at least one target.
pub fn cohort_sizes(total: usize, cohorts: &[u8]) -> Vec<usize> {
    let mut sizes = Vec::with_capacity(cohorts.len());
    let mut reached = 0;
    for pct in cohorts {
        if reached == total {
            break;
        }
        let wanted = (total * usize::from(*pct)).div_ceil(100);
        reached = wanted.max(reached + 1).min(total);
        sizes.push(reached);
    }
    if reached < total {
        sizes.push(total);
    }
    sizes
}

#[async_trait]
impl RolloutStrategy for CanaryRollout {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Canary
    }

    async fn execute(&self, rollout: &Rollout<'_>) -> Result<(), RolloutError> {
        let cfg = &rollout.config.canary;
        let total = rollout.targets.len();
        let mut deployed = 0;

        for (idx, reach) in cohort_sizes(total, &cfg.cohorts).into_iter().enumerate() {
            let cohort = idx + 1;
            for target in &rollout.targets[deployed..reach] {
                rollout.observer.boundary().await?;
                rollout.deploy_target(target).await?;
            }
            deployed = reach;
            rollout.observer.progress(percent(deployed, total)).await;
            rollout
                .observer
                .log(
                    LogLevel::Info,
                    None,
                    &format!("cohort {cohort}: {deployed}/{total} targets, observing health"),
                )
                .await;

            let monitor = HealthMonitor::new(
                rollout.runtime,
                cfg.thresholds,
                Duration::from_millis(cfg.sample_interval_ms),
                rollout.config.runtime.call_timeout(),
            );
            match monitor
                .run(&rollout.targets[..deployed], cfg.samples_per_cohort)
                .await
            {
                MonitorOutcome::Breach { target, reason } => {
                    rollout
                        .observer
                        .log(
                            LogLevel::Error,
                            Some(&target),
                            &format!("health breach in cohort {cohort}: {reason}"),
                        )
                        .await;
                    obs::emit_health_breach(rollout.deployment_id, &target, &reason);
                    METRICS.inc_health_breaches();
                    return Err(PipelineError::CanaryHalted {
                        cohort,
                        target,
                        reason,
                    }
                    .into());
                }
                MonitorOutcome::Healthy { samples, missed } => {
                    let message = if missed > 0 {
                        format!("cohort {cohort} healthy ({samples} samples, {missed} missed)")
                    } else {
                        format!("cohort {cohort} healthy ({samples} samples)")
                    };
                    rollout.observer.log(LogLevel::Info, None, &message).await;
                }
            }
        }
        Ok(())
    }
}
