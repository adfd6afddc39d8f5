//! Global atomic counters for pipeline observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    deployments_started: AtomicU64,
    deployments_failed: AtomicU64,
    rollbacks: AtomicU64,
    checks_run: AtomicU64,
    approvals_decided: AtomicU64,
    health_breaches: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            deployments_started: AtomicU64::new(0),
            deployments_failed: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
            checks_run: AtomicU64::new(0),
            approvals_decided: AtomicU64::new(0),
            health_breaches: AtomicU64::new(0),
        }
    }

    pub fn inc_deployments_started(&self) {
        self.deployments_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "deployments_started", "counter incremented");
    }

    pub fn inc_deployments_failed(&self) {
        self.deployments_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "deployments_failed", "counter incremented");
    }

    pub fn inc_rollbacks(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "rollbacks", "counter incremented");
    }

    /// Count one safety run (all checks of it).
    pub fn inc_checks_run(&self) {
        self.checks_run.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "checks_run", "counter incremented");
    }

    pub fn inc_approvals_decided(&self) {
        self.approvals_decided.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "approvals_decided", "counter incremented");
    }

    pub fn inc_health_breaches(&self) {
        self.health_breaches.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "health_breaches", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            deployments_started = self.deployments_started(),
            deployments_failed = self.deployments_failed(),
            rollbacks = self.rollbacks(),
            checks_run = self.checks_run(),
            approvals_decided = self.approvals_decided(),
            health_breaches = self.health_breaches(),
        );
    }

    pub fn deployments_started(&self) -> u64 {
        self.deployments_started.load(Ordering::Relaxed)
    }

    pub fn deployments_failed(&self) -> u64 {
        self.deployments_failed.load(Ordering::Relaxed)
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    pub fn checks_run(&self) -> u64 {
        self.checks_run.load(Ordering::Relaxed)
    }

    pub fn approvals_decided(&self) -> u64 {
        self.approvals_decided.load(Ordering::Relaxed)
    }

    pub fn health_breaches(&self) -> u64 {
        self.health_breaches.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.deployments_started.store(0, Ordering::Relaxed);
        self.deployments_failed.store(0, Ordering::Relaxed);
        self.rollbacks.store(0, Ordering::Relaxed);
        self.checks_run.store(0, Ordering::Relaxed);
        self.approvals_decided.store(0, Ordering::Relaxed);
        self.health_breaches.store(0, Ordering::Relaxed);
    }
}
