//! Sequential execution of the safety rules with streamed progress.

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::check::{CheckStatus, CheckUpdate, SafetyCheck, SafetyRun};
use crate::context::CheckContext;
use crate::facts::ExtractedFacts;
use crate::rules::{builtin_rules, Aggregates, SafetyRule};

/// Safety check orchestrator.
pub struct SafetyPipeline {
    rules: Vec<Box<dyn SafetyRule>>,
}

impl Default for SafetyPipeline {
    fn default() -> Self {
        Self::standard()
    }
}

impl SafetyPipeline {
    /// The eight builtin checks in their fixed order.
    pub fn standard() -> Self {
        Self {
            rules: builtin_rules(),
        }
    }

    pub fn with_rules(rules: Vec<Box<dyn SafetyRule>>) -> Self {
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run every rule under a fresh run id.
    pub async fn run(
        &self,
        release_id: &str,
        facts: &ExtractedFacts,
        ctx: &CheckContext,
        updates: Option<&mpsc::Sender<CheckUpdate>>,
    ) -> SafetyRun {
        let run_id = Uuid::new_v4().to_string();
        self.run_as(&run_id, release_id, facts, ctx, updates).await
    }

    /// Run every rule under the given run id.
    ///
    /// All checks are first announced as `pending`; each then moves through
    /// `running` to its outcome before the next one starts. A closed update
    /// channel does not stop the run.
    pub async fn run_as(
        &self,
        run_id: &str,
        release_id: &str,
        facts: &ExtractedFacts,
        ctx: &CheckContext,
        updates: Option<&mpsc::Sender<CheckUpdate>>,
    ) -> SafetyRun {
        let started_at = Utc::now();
        info!(
            run_id = %run_id,
            release_id = %release_id,
            snapshot = %facts.snapshot_digest.short(),
            "Starting safety checks"
        );

        let mut checks: Vec<SafetyCheck> = self
            .rules
            .iter()
            .map(|r| SafetyCheck::pending(run_id, r.kind()))
            .collect();
        for (index, check) in checks.iter().enumerate() {
            publish(updates, run_id, index, check).await;
        }

        let mut aggregates = Aggregates::default();
        for (index, rule) in self.rules.iter().enumerate() {
            checks[index].status = CheckStatus::Running;
            publish(updates, run_id, index, &checks[index]).await;

            let outcome = rule.evaluate(facts, ctx, &mut aggregates);
            let check = &mut checks[index];
            check.status = outcome.status;
            check.message = outcome.message;
            check.details = outcome.details;

            match check.status {
                CheckStatus::Failed => warn!(
                    run_id = %run_id,
                    check = %check.name,
                    message = %check.message,
                    "Safety check failed"
                ),
                _ => info!(
                    run_id = %run_id,
                    check = %check.name,
                    status = ?check.status,
                    message = %check.message,
                    "Safety check completed"
                ),
            }
            publish(updates, run_id, index, &checks[index]).await;
        }

        let run = SafetyRun {
            run_id: run_id.to_string(),
            release_id: release_id.to_string(),
            snapshot_digest: facts.snapshot_digest.clone(),
            started_at,
            finished_at: Utc::now(),
            checks,
        };
        info!(
            run_id = %run_id,
            blocked = run.is_blocked(),
            warnings = run.warning_count(),
            "Safety checks finished"
        );
        run
    }
}

async fn publish(
    updates: Option<&mpsc::Sender<CheckUpdate>>,
    run_id: &str,
    index: usize,
    check: &SafetyCheck,
) {
    let Some(tx) = updates else {
        return;
    };
    let update = CheckUpdate {
        run_id: run_id.to_string(),
        index,
        check: check.clone(),
    };
    if tx.send(update).await.is_err() {
        debug!(run_id = %run_id, "Check update receiver dropped");
    }
}
