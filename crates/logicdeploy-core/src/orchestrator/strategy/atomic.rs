//! Atomic rollout: stage everywhere first, then swap everywhere.
//!
//! No target runs the new program until every target has accepted it.

use async_trait::async_trait;

use super::{percent, Rollout, RolloutError, RolloutStrategy};
use crate::domain::StrategyKind;

pub struct AtomicRollout;

#[async_trait]
impl RolloutStrategy for AtomicRollout {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Atomic
    }

    async fn execute(&self, rollout: &Rollout<'_>) -> Result<(), RolloutError> {
        let total = rollout.targets.len();
        let mut staged = Vec::with_capacity(total);

        for (i, target) in rollout.targets.iter().enumerate() {
            rollout.observer.boundary().await?;
            staged.push(rollout.stage(target).await?);
            rollout.observer.progress(percent(i + 1, total) / 2).await;
        }

        rollout.observer.boundary().await?;
        for (i, artifact) in staged.iter().enumerate() {
            rollout.activate(artifact).await?;
            rollout
                .observer
                .progress(50 + percent(i + 1, total) / 2)
                .await;
        }

        for artifact in &staged {
            rollout.cleanup(artifact).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::domain::PipelineError;
    use crate::orchestrator::clock::SystemClock;
    use logicdeploy_state::fakes::RuntimeFault;

    #[tokio::test]
    async fn test_activates_only_after_all_staged() {
        let rt = runtime(&["plc-1", "plc-2"]);
        let snap = snapshot();
        let facts = logicdeploy_safety::extract(&snap);
        let cfg = config();
        let observer = RecordingObserver::default();
        let ids = targets(&["plc-1", "plc-2"]);
        let rollout = Rollout {
            deployment_id: "dep-1",
            snapshot: &snap,
            facts: &facts,
            targets: &ids,
            runtime: &rt,
            config: &cfg,
            clock: &SystemClock,
            observer: &observer,
        };

        AtomicRollout.execute(&rollout).await.unwrap();

        let ops: Vec<&str> = rt.calls().iter().map(|c| c.operation).collect();
        let last_validate = ops.iter().rposition(|o| *o == "validate").unwrap();
        let first_activate = ops.iter().position(|o| *o == "activate").unwrap();
        assert!(last_validate < first_activate);
        assert_eq!(observer.last_percent(), Some(100));
        assert_eq!(rt.state("plc-2").unwrap().active_snapshot.as_deref(), Some("snap-2"));
    }

    #[tokio::test]
    async fn test_validation_failure_leaves_targets_untouched() {
        let rt = runtime(&["plc-1", "plc-2"]);
        rt.script_fault("plc-2", "validate", RuntimeFault::Reject("bad checksum".into()));
        let snap = snapshot();
        let facts = logicdeploy_safety::extract(&snap);
        let cfg = config();
        let observer = RecordingObserver::default();
        let ids = targets(&["plc-1", "plc-2"]);
        let rollout = Rollout {
            deployment_id: "dep-1",
            snapshot: &snap,
            facts: &facts,
            targets: &ids,
            runtime: &rt,
            config: &cfg,
            clock: &SystemClock,
            observer: &observer,
        };

        let err = AtomicRollout.execute(&rollout).await.unwrap_err();
        assert!(matches!(err, RolloutError::Failed(PipelineError::Runtime(_))));
        assert_eq!(rt.call_count("activate"), 0);
        assert_eq!(rt.state("plc-1").unwrap().active_snapshot.as_deref(), Some("snap-1"));
    }

    #[tokio::test]
    async fn test_cancel_at_boundary() {
        let rt = runtime(&["plc-1", "plc-2"]);
        let snap = snapshot();
        let facts = logicdeploy_safety::extract(&snap);
        let cfg = config();
        let observer = RecordingObserver::default();
        *observer.cancel_after.lock().unwrap() = Some(1);
        let ids = targets(&["plc-1", "plc-2"]);
        let rollout = Rollout {
            deployment_id: "dep-1",
            snapshot: &snap,
            facts: &facts,
            targets: &ids,
            runtime: &rt,
            config: &cfg,
            clock: &SystemClock,
            observer: &observer,
        };

        let err = AtomicRollout.execute(&rollout).await.unwrap_err();
        assert!(matches!(err, RolloutError::Cancelled));
        assert_eq!(rt.call_count("upload"), 1);
    }
}
