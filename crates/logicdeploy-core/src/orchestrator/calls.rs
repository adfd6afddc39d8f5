//! Deadline-bounded target runtime calls with post-timeout reconciliation.
//!
//! A timed-out mutating call may or may not have landed on the controller.
//! [`RuntimeCalls::mutate`] re-queries the remote state and compares it with
//! the effect the call was meant to have before deciding the outcome.

use std::future::Future;

use logicdeploy_state::{RemoteState, RuntimeError, RuntimeResult, TargetRuntime};
use tracing::{debug, error, warn};

use crate::config::RuntimeConfig;
use crate::domain::{PipelineError, PipelineResult};

/// How a mutating call was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Applied,
    /// The call timed out but a re-query showed its effect.
    ConfirmedAfterTimeout,
}

pub struct RuntimeCalls<'a> {
    runtime: &'a dyn TargetRuntime,
    config: &'a RuntimeConfig,
}

impl<'a> RuntimeCalls<'a> {
    pub fn new(runtime: &'a dyn TargetRuntime, config: &'a RuntimeConfig) -> Self {
        Self { runtime, config }
    }

    pub fn runtime(&self) -> &'a dyn TargetRuntime {
        self.runtime
    }

    /// Await `fut` under the configured call deadline.
    pub async fn call<T, F>(&self, target: &str, operation: &str, fut: F) -> RuntimeResult<T>
    where
        F: Future<Output = RuntimeResult<T>> + Send,
    {
        match tokio::time::timeout(self.config.call_timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::Timeout {
                target: target.to_string(),
                operation: operation.to_string(),
                timeout_ms: self.config.call_timeout_ms,
            }),
        }
    }

    pub async fn query_state(&self, target: &str) -> RuntimeResult<RemoteState> {
        self.call(target, "query_state", self.runtime.query_state(target))
            .await
    }

    /// Run a mutating call; on timeout, settle it against `expected`.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Runtime` if the call failed outright or a
    /// re-query shows it did not take effect.
    /// Returns `PipelineError::RuntimeCommunication` if the outcome is still
    /// unknown after `requery_attempts` re-queries.
    pub async fn mutate<F>(
        &self,
        target: &str,
        operation: &str,
        fut: F,
        expected: impl Fn(&RemoteState) -> bool + Send + Sync,
    ) -> PipelineResult<CallOutcome>
    where
        F: Future<Output = RuntimeResult<()>> + Send,
    {
        match self.call(target, operation, fut).await {
            Ok(()) => Ok(CallOutcome::Applied),
            Err(e) if e.is_timeout() => self.reconcile(target, operation, e, expected).await,
            Err(e) => Err(PipelineError::Runtime(e)),
        }
    }

    async fn reconcile(
        &self,
        target: &str,
        operation: &str,
        timeout: RuntimeError,
        expected: impl Fn(&RemoteState) -> bool + Send + Sync,
    ) -> PipelineResult<CallOutcome> {
        warn!(target_id = %target, operation = %operation, "call timed out, re-querying remote state");
        for attempt in 1..=self.config.requery_attempts {
            tokio::time::sleep(self.config.requery_delay()).await;
            match self.query_state(target).await {
                Ok(state) if expected(&state) => {
                    warn!(target_id = %target, operation = %operation, attempt, "effect confirmed after timeout");
                    return Ok(CallOutcome::ConfirmedAfterTimeout);
                }
                Ok(_) => {
                    warn!(target_id = %target, operation = %operation, attempt, "timed-out call did not take effect");
                    return Err(PipelineError::Runtime(timeout));
                }
                Err(e) => debug!(target_id = %target, attempt, error = %e, "re-query failed"),
            }
        }

        error!(
            target_id = %target,
            operation = %operation,
            attempts = self.config.requery_attempts,
            "outcome unknown; manual verification required"
        );
        Err(PipelineError::RuntimeCommunication {
            target: target.to_string(),
            operation: operation.to_string(),
            detail: format!(
                "{timeout}; remote state unknown after {} re-queries",
                self.config.requery_attempts
            ),
        })
    }
}
