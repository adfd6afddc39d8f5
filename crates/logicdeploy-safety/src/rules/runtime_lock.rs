use super::{Aggregates, RuleOutcome, SafetyRule};
use crate::check::CheckKind;
use crate::context::CheckContext;
use crate::facts::ExtractedFacts;

/// Fails when a target is locked by someone else, or when a maintenance
/// rollout has no approved window open now or within its allowed wait.
pub struct RuntimeLockRule;

impl SafetyRule for RuntimeLockRule {
    fn kind(&self) -> CheckKind {
        CheckKind::RuntimeLock
    }

    fn evaluate(&self, _facts: &ExtractedFacts, ctx: &CheckContext, _agg: &mut Aggregates) -> RuleOutcome {
        let mut blocked = Vec::new();
        let at = ctx.evaluated_at;

        for target in &ctx.targets {
            if let Some(holder) = &target.lock.holder {
                if *holder != ctx.deployer {
                    blocked.push(format!("{}: locked by {holder}", target.target_id));
                }
            }
            if !ctx.requires_maintenance_window || target.lock.active_window(at).is_some() {
                continue;
            }
            match target.lock.next_window(at) {
                Some(w) if w.starts_at <= at + ctx.maintenance_wait => {}
                Some(w) => blocked.push(format!(
                    "{}: next maintenance window opens {}, beyond the allowed wait",
                    target.target_id,
                    w.starts_at.to_rfc3339()
                )),
                None => blocked.push(format!(
                    "{}: no approved maintenance window",
                    target.target_id
                )),
            }
        }

        if blocked.is_empty() {
            RuleOutcome::passed(format!("{} target(s) available", ctx.targets.len()))
        } else {
            RuleOutcome::failed(
                format!("{} target(s) unavailable", blocked.len()),
                blocked,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::CheckStatus;
    use crate::context::TargetProfile;
    use crate::rules::test_support::{context, facts};
    use chrono::Duration;
    use logicdeploy_state::{MaintenanceWindow, RuntimeLock};

    fn target(holder: Option<&str>, windows: Vec<MaintenanceWindow>) -> TargetProfile {
        TargetProfile {
            lock: RuntimeLock {
                holder: holder.map(str::to_string),
                windows,
            },
            ..TargetProfile::open("plc-1")
        }
    }

    fn run(ctx: &crate::context::CheckContext) -> RuleOutcome {
        RuntimeLockRule.evaluate(&facts(&[]), ctx, &mut Aggregates::default())
    }

    #[test]
    fn unlocked_target_passes() {
        assert_eq!(run(&context()).status, CheckStatus::Passed);
    }

    #[test]
    fn foreign_holder_fails() {
        let ctx = context().with_targets(vec![target(Some("eng-station-4"), vec![])]);
        let out = run(&ctx);
        assert_eq!(out.status, CheckStatus::Failed);
        assert_eq!(out.details, vec!["plc-1: locked by eng-station-4".to_string()]);
    }

    #[test]
    fn own_lock_is_fine() {
        let ctx = context().with_targets(vec![target(Some("logicdeploy"), vec![])]);
        assert_eq!(run(&ctx).status, CheckStatus::Passed);
    }

    #[test]
    fn maintenance_needs_a_window() {
        let base = context();
        let at = base.evaluated_at;
        let soon = MaintenanceWindow {
            starts_at: at + Duration::minutes(30),
            ends_at: at + Duration::hours(2),
            approved: true,
        };

        let none = base
            .clone()
            .with_targets(vec![target(None, vec![])])
            .with_maintenance_window(Duration::hours(1));
        assert_eq!(run(&none).status, CheckStatus::Failed);

        let within = base
            .clone()
            .with_targets(vec![target(None, vec![soon.clone()])])
            .with_maintenance_window(Duration::hours(1));
        assert_eq!(run(&within).status, CheckStatus::Passed);

        let too_far = base
            .with_targets(vec![target(None, vec![soon])])
            .with_maintenance_window(Duration::minutes(10));
        assert_eq!(run(&too_far).status, CheckStatus::Failed);
    }

    #[test]
    fn unapproved_window_does_not_count() {
        let base = context();
        let at = base.evaluated_at;
        let ctx = base
            .with_targets(vec![target(
                None,
                vec![MaintenanceWindow {
                    starts_at: at - Duration::minutes(5),
                    ends_at: at + Duration::hours(1),
                    approved: false,
                }],
            )])
            .with_maintenance_window(Duration::zero());
        assert_eq!(run(&ctx).status, CheckStatus::Failed);
    }
}
