//! Per-release mutation guards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per release. Every mutating entry point holds the
/// release's guard while it reads and writes deployment state.
#[derive(Default)]
pub struct ReleaseLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ReleaseLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, release_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(release_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
