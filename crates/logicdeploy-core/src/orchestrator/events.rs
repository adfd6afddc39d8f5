//! Per-deployment progress event streams.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::{DeploymentStatus, ProgressEntry};

const CHANNEL_CAPACITY: usize = 256;

/// Snapshot of a deployment's progress pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentEvent {
    pub deployment_id: String,
    pub status: DeploymentStatus,
    pub percent: u8,
    /// Log line that triggered the event, if any.
    pub entry: Option<ProgressEntry>,
}

/// Broadcast channels keyed by deployment id.
///
/// Subscribers that lag more than the channel capacity miss events; they
/// can always re-read the deployment with `get_deployment`.
#[derive(Default)]
pub struct EventBus {
    channels: Mutex<HashMap<String, broadcast::Sender<DeploymentEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, deployment_id: &str) -> broadcast::Receiver<DeploymentEvent> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(deployment_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish to current subscribers; without any the event is dropped.
    pub fn publish(&self, event: DeploymentEvent) {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = channels.get(&event.deployment_id) {
            let _ = tx.send(event);
        }
    }

    /// Drop the channel of a finished deployment; receivers see `Closed`
    /// after draining.
    pub fn close(&self, deployment_id: &str) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.remove(deployment_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, status: DeploymentStatus) -> DeploymentEvent {
        DeploymentEvent {
            deployment_id: id.to_string(),
            status,
            percent: 0,
            entry: None,
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_only_their_deployment() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("dep-1");
        bus.publish(event("dep-2", DeploymentStatus::Staging));
        bus.publish(event("dep-1", DeploymentStatus::Staging));

        let got = rx.recv().await.unwrap();
        assert_eq!(got.deployment_id, "dep-1");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("dep-1");
        bus.publish(event("dep-1", DeploymentStatus::Completed));
        bus.close("dep-1");

        assert_eq!(rx.recv().await.unwrap().status, DeploymentStatus::Completed);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
