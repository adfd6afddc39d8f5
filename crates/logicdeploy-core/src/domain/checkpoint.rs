use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use logicdeploy_state::RemoteState;
use serde::{Deserialize, Serialize};

/// Remote state of every target, captured before the first mutating call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub deployment_id: String,
    pub release_id: String,
    /// Target id -> state seen before any mutation.
    pub captured_state: BTreeMap<String, RemoteState>,
    pub captured_at: DateTime<Utc>,
    /// End of the retention period; set once the deployment completes.
    pub expires_at: Option<DateTime<Utc>>,
    /// Set when retention discarded the captured state.
    pub pruned_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    pub fn is_usable(&self) -> bool {
        self.pruned_at.is_none()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|e| now >= e)
    }
}
