//! Pause and cancel signals read by the executor at step boundaries.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlSignal {
    Run,
    Pause,
    /// Sticky; never reverts.
    Cancel,
}

/// Control channel of one running deployment.
pub struct DeploymentControl {
    tx: watch::Sender<ControlSignal>,
}

impl Default for DeploymentControl {
    fn default() -> Self {
        Self::new()
    }
}

impl DeploymentControl {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ControlSignal::Run);
        Self { tx }
    }

    /// A control that starts paused, used for recovered deployments.
    pub fn paused() -> Self {
        let (tx, _) = watch::channel(ControlSignal::Pause);
        Self { tx }
    }

    pub fn signal(&self) -> ControlSignal {
        *self.tx.borrow()
    }

    /// Returns `false` if the deployment is cancelled.
    pub fn pause(&self) -> bool {
        self.tx.send_if_modified(|s| {
            if *s == ControlSignal::Run {
                *s = ControlSignal::Pause;
                true
            } else {
                false
            }
        });
        self.signal() == ControlSignal::Pause
    }

    /// Returns `false` if the deployment is cancelled.
    pub fn resume(&self) -> bool {
        self.tx.send_if_modified(|s| {
            if *s == ControlSignal::Pause {
                *s = ControlSignal::Run;
                true
            } else {
                false
            }
        });
        self.signal() == ControlSignal::Run
    }

    pub fn cancel(&self) {
        self.tx.send_replace(ControlSignal::Cancel);
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal() == ControlSignal::Cancel
    }

    /// Wait at a step boundary.
    ///
    /// Returns immediately while running, parks while paused and returns
    /// `false` once cancelled.
    pub async fn boundary(&self) -> bool {
        let mut rx = self.tx.subscribe();
        let run = match rx.wait_for(|s| *s != ControlSignal::Pause).await {
            Ok(signal) => *signal == ControlSignal::Run,
            Err(_) => false,
        };
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_boundary_passes_while_running() {
        let control = DeploymentControl::new();
        assert!(control.boundary().await);
    }

    #[tokio::test]
    async fn test_pause_parks_until_resume() {
        let control = Arc::new(DeploymentControl::new());
        assert!(control.pause());

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.boundary().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        assert!(control.resume());
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_releases_paused_boundary() {
        let control = Arc::new(DeploymentControl::paused());
        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.boundary().await })
        };
        control.cancel();
        assert!(!waiter.await.unwrap());
        assert!(!control.resume());
        assert!(control.is_cancelled());
    }
}
