//! Structured observability hooks for deployment lifecycle events.
//!
//! This module provides:
//! - Deployment-scoped tracing spans via the `DeploymentSpan` RAII guard and
//!   [`deployment_span`] for async code
//! - Emission functions for transitions, check results, approval decisions,
//!   rollbacks and health breaches
//!
//! Events are emitted at `info!` level unless they report a failure. Filter
//! with `RUST_LOG`; see [`crate::telemetry::init_tracing`] for JSON output.

use tracing::{error, info, warn};

use crate::approvals::RoundStatus;
use crate::domain::{DeploymentStatus, RollbackStatus};

/// RAII guard that enters a deployment-scoped tracing span.
///
/// # Example
///
/// ```ignore
/// let _span = DeploymentSpan::enter("dep-1", "rel-7");
/// // every event below carries deployment_id and release_id
/// ```
pub struct DeploymentSpan {
    _span: tracing::span::EnteredSpan,
}

impl DeploymentSpan {
    pub fn enter(deployment_id: &str, release_id: &str) -> Self {
        Self {
            _span: deployment_span(deployment_id, release_id).entered(),
        }
    }
}

/// The deployment-scoped span, for instrumenting futures.
///
/// An entered span cannot be held across `.await` in a `Send` future; async
/// code attaches this span with `tracing::Instrument` instead.
pub fn deployment_span(deployment_id: &str, release_id: &str) -> tracing::Span {
    tracing::info_span!(
        "logicdeploy.deployment",
        deployment_id = %deployment_id,
        release_id = %release_id
    )
}

/// Emit event: a deployment moved between states.
pub fn emit_deployment_transition(
    deployment_id: &str,
    from: DeploymentStatus,
    to: DeploymentStatus,
) {
    match to {
        DeploymentStatus::Failed => warn!(
            event = "deployment.transition",
            deployment_id = %deployment_id,
            from = %from,
            to = %to,
        ),
        _ => info!(
            event = "deployment.transition",
            deployment_id = %deployment_id,
            from = %from,
            to = %to,
        ),
    }
}

/// Emit event: a safety run finished.
pub fn emit_check_completed(release_id: &str, run_id: &str, passed: bool, warnings: usize) {
    info!(
        event = "safety.completed",
        release_id = %release_id,
        run_id = %run_id,
        passed = passed,
        warnings = warnings,
    );
}

/// Emit event: an approver decided a slot.
pub fn emit_approval_decided(
    release_id: &str,
    approval_id: &str,
    approver: &str,
    decision: &str,
    round_status: RoundStatus,
) {
    info!(
        event = "approval.decided",
        release_id = %release_id,
        approval_id = %approval_id,
        approver = %approver,
        decision = %decision,
        round_status = ?round_status,
    );
}

/// Emit event: a rollback attempt ended. Failures are logged at error level.
pub fn emit_rollback(deployment_id: &str, rollback_id: &str, status: RollbackStatus, attempts: u32) {
    match status {
        RollbackStatus::Failed => error!(
            event = "rollback.finished",
            deployment_id = %deployment_id,
            rollback_id = %rollback_id,
            status = ?status,
            attempts = attempts,
            "manual intervention required"
        ),
        _ => info!(
            event = "rollback.finished",
            deployment_id = %deployment_id,
            rollback_id = %rollback_id,
            status = ?status,
            attempts = attempts,
        ),
    }
}

/// Emit event: a target breached its health thresholds.
pub fn emit_health_breach(deployment_id: &str, target: &str, reason: &str) {
    warn!(
        event = "health.breach",
        deployment_id = %deployment_id,
        target_id = %target,
        reason = %reason,
    );
}
