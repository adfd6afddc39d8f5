//! Maintenance-window rollout: full stop, swap and restart per target.
//!
//! Each target is only touched inside one of its approved maintenance
//! windows. If no window opens within `maintenance.max_wait_secs` the
//! rollout fails before quiescing that target.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use logicdeploy_state::RuntimeError;
use tokio::time::Instant;

use super::{percent, Rollout, RolloutError, RolloutStrategy};
use crate::domain::{LogLevel, PipelineError, StrategyKind};
use crate::orchestrator::calls::CallOutcome;

pub struct MaintenanceRollout;

/// Wall-clock time that advances with the tokio clock, so waits can be
/// driven by a paused test runtime.
struct WaitClock {
    wall: DateTime<Utc>,
    started: Instant,
}

impl WaitClock {
    fn start(wall: DateTime<Utc>) -> Self {
        Self {
            wall,
            started: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = Duration::from_std(self.started.elapsed()).unwrap_or_else(|_| Duration::zero());
        self.wall + elapsed
    }
}

async fn wait_for_window(
    rollout: &Rollout<'_>,
    target: &str,
    clock: &WaitClock,
    deadline: DateTime<Utc>,
) -> Result<(), RolloutError> {
    let calls = rollout.calls();
    loop {
        let lock = calls
            .call(target, "lock_status", rollout.runtime.lock_status(target))
            .await
            .map_err(PipelineError::Runtime)?;
        let now = clock.now();
        if let Some(window) = lock.active_window(now) {
            rollout
                .observer
                .log(
                    LogLevel::Info,
                    Some(target),
                    &format!("inside maintenance window until {}", window.ends_at.to_rfc3339()),
                )
                .await;
            return Ok(());
        }

        let next = match lock.next_window(now) {
            Some(w) if w.starts_at <= deadline => w.starts_at,
            Some(w) => {
                return Err(PipelineError::NoMaintenanceWindow {
                    target: target.to_string(),
                    reason: format!(
                        "next approved window opens at {}, past the wait limit",
                        w.starts_at.to_rfc3339()
                    ),
                }
                .into())
            }
            None => {
                return Err(PipelineError::NoMaintenanceWindow {
                    target: target.to_string(),
                    reason: "no approved window scheduled".into(),
                }
                .into())
            }
        };
        rollout
            .observer
            .log(
                LogLevel::Info,
                Some(target),
                &format!("waiting for maintenance window at {}", next.to_rfc3339()),
            )
            .await;
        let wait = (next - now)
            .to_std()
            .unwrap_or_default()
            .max(std::time::Duration::from_millis(1));
        tokio::time::sleep(wait).await;
    }
}

async fn note(rollout: &Rollout<'_>, target: &str, operation: &str, outcome: CallOutcome) {
    let message = match outcome {
        CallOutcome::Applied => format!("{operation} done"),
        CallOutcome::ConfirmedAfterTimeout => {
            format!("{operation} timed out; re-query confirmed it took effect")
        }
    };
    let level = match outcome {
        CallOutcome::Applied => LogLevel::Info,
        CallOutcome::ConfirmedAfterTimeout => LogLevel::Warn,
    };
    rollout.observer.log(level, Some(target), &message).await;
}

async fn cycle_target(rollout: &Rollout<'_>, target: &str) -> Result<(), RolloutError> {
    let calls = rollout.calls();

    let outcome = calls
        .mutate(target, "quiesce", rollout.runtime.quiesce(target), |s| !s.running)
        .await?;
    note(rollout, target, "quiesce", outcome).await;

    let artifact = rollout.stage(target).await?;
    rollout.activate(&artifact).await?;
    rollout.cleanup(&artifact).await;

    let outcome = calls
        .mutate(target, "restart", rollout.runtime.restart(target), |s| s.running)
        .await?;
    note(rollout, target, "restart", outcome).await;

    let state = calls
        .query_state(target)
        .await
        .map_err(PipelineError::Runtime)?;
    let expected = rollout.snapshot.snapshot_id.as_str();
    if !state.running || state.active_snapshot.as_deref() != Some(expected) {
        return Err(PipelineError::Runtime(RuntimeError::Rejected {
            target: target.to_string(),
            operation: "verify".to_string(),
            reason: format!(
                "expected {expected} running, found {} ({})",
                state.active_snapshot.as_deref().unwrap_or("nothing"),
                if state.running { "running" } else { "stopped" }
            ),
        })
        .into());
    }
    rollout
        .observer
        .log(LogLevel::Info, Some(target), "verified running after restart")
        .await;
    Ok(())
}

#[async_trait]
impl RolloutStrategy for MaintenanceRollout {
    fn kind(&self) -> StrategyKind {
        StrategyKind::MaintenanceWindow
    }

    async fn execute(&self, rollout: &Rollout<'_>) -> Result<(), RolloutError> {
        let clock = WaitClock::start(rollout.clock.now());
        let deadline =
            clock.now() + Duration::seconds(rollout.config.maintenance.max_wait_secs as i64);
        let total = rollout.targets.len();

        for (i, target) in rollout.targets.iter().enumerate() {
            rollout.observer.boundary().await?;
            wait_for_window(rollout, target, &clock, deadline).await?;
            rollout.observer.boundary().await?;
            cycle_target(rollout, target).await?;
            rollout.observer.progress(percent(i + 1, total)).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::orchestrator::clock::ManualClock;
    use logicdeploy_state::fakes::RuntimeFault;
    use logicdeploy_state::{MaintenanceWindow, RuntimeLock};

    fn window(start: DateTime<Utc>, minutes: i64, approved: bool) -> RuntimeLock {
        RuntimeLock {
            holder: None,
            windows: vec![MaintenanceWindow {
                starts_at: start,
                ends_at: start + Duration::minutes(minutes),
                approved,
            }],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_window_then_cycles() {
        let now = Utc::now();
        let clock = ManualClock::new(now);
        let rt = runtime(&["plc-1"]);
        rt.set_lock("plc-1", window(now + Duration::minutes(10), 30, true));
        let snap = snapshot();
        let facts = logicdeploy_safety::extract(&snap);
        let cfg = config();
        let observer = RecordingObserver::default();
        let ids = targets(&["plc-1"]);
        let rollout = Rollout {
            deployment_id: "dep-1",
            snapshot: &snap,
            facts: &facts,
            targets: &ids,
            runtime: &rt,
            config: &cfg,
            clock: &clock,
            observer: &observer,
        };

        MaintenanceRollout.execute(&rollout).await.unwrap();

        assert!(observer.contains("waiting for maintenance window"));
        assert!(observer.contains("verified running after restart"));
        let ops: Vec<&str> = rt
            .calls()
            .iter()
            .map(|c| c.operation)
            .filter(|o| ["quiesce", "activate", "restart"].contains(o))
            .collect();
        assert_eq!(ops, vec!["quiesce", "activate", "restart"]);
        let state = rt.state("plc-1").unwrap();
        assert!(state.running);
        assert_eq!(state.active_snapshot.as_deref(), Some("snap-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unapproved_window_is_ignored() {
        let now = Utc::now();
        let clock = ManualClock::new(now);
        let rt = runtime(&["plc-1"]);
        rt.set_lock("plc-1", window(now - Duration::minutes(1), 30, false));
        let snap = snapshot();
        let facts = logicdeploy_safety::extract(&snap);
        let cfg = config();
        let observer = RecordingObserver::default();
        let ids = targets(&["plc-1"]);
        let rollout = Rollout {
            deployment_id: "dep-1",
            snapshot: &snap,
            facts: &facts,
            targets: &ids,
            runtime: &rt,
            config: &cfg,
            clock: &clock,
            observer: &observer,
        };

        let err = MaintenanceRollout.execute(&rollout).await.unwrap_err();
        assert!(matches!(
            err,
            RolloutError::Failed(PipelineError::NoMaintenanceWindow { .. })
        ));
        assert_eq!(rt.call_count("quiesce"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_past_wait_limit_fails() {
        let now = Utc::now();
        let clock = ManualClock::new(now);
        let rt = runtime(&["plc-1"]);
        rt.set_lock("plc-1", window(now + Duration::hours(5), 30, true));
        let snap = snapshot();
        let facts = logicdeploy_safety::extract(&snap);
        let cfg = config();
        let observer = RecordingObserver::default();
        let ids = targets(&["plc-1"]);
        let rollout = Rollout {
            deployment_id: "dep-1",
            snapshot: &snap,
            facts: &facts,
            targets: &ids,
            runtime: &rt,
            config: &cfg,
            clock: &clock,
            observer: &observer,
        };

        let err = MaintenanceRollout.execute(&rollout).await.unwrap_err();
        match err {
            RolloutError::Failed(PipelineError::NoMaintenanceWindow { reason, .. }) => {
                assert!(reason.contains("past the wait limit"))
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiesce_timeout_confirmed_by_requery() {
        let now = Utc::now();
        let clock = ManualClock::new(now);
        let rt = runtime(&["plc-1"]);
        rt.set_lock("plc-1", window(now - Duration::minutes(1), 30, true));
        rt.script_fault("plc-1", "quiesce", RuntimeFault::Timeout { applied: true });
        let snap = snapshot();
        let facts = logicdeploy_safety::extract(&snap);
        let cfg = config();
        let observer = RecordingObserver::default();
        let ids = targets(&["plc-1"]);
        let rollout = Rollout {
            deployment_id: "dep-1",
            snapshot: &snap,
            facts: &facts,
            targets: &ids,
            runtime: &rt,
            config: &cfg,
            clock: &clock,
            observer: &observer,
        };

        MaintenanceRollout.execute(&rollout).await.unwrap();
        assert!(observer.contains("quiesce timed out; re-query confirmed"));
    }
}
