//! Active runs keyed by run id.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use stepwise_core::types::RunId;

/// Cancellation handles of the runs currently executing.
#[derive(Default)]
pub struct RunRegistry {
    runs: RwLock<HashMap<RunId, CancellationToken>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, run_id: RunId, token: CancellationToken) {
        self.runs.write().await.insert(run_id, token);
    }

    pub async fn remove(&self, run_id: &RunId) -> bool {
        self.runs.write().await.remove(run_id).is_some()
    }

    /// Signal cancellation. Returns whether the run is active; repeated calls
    /// are harmless.
    pub async fn cancel(&self, run_id: &RunId) -> bool {
        match self.runs.read().await.get(run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn contains(&self, run_id: &RunId) -> bool {
        self.runs.read().await.contains_key(run_id)
    }

    /// Active run ids, sorted.
    pub async fn active(&self) -> Vec<RunId> {
        let mut ids: Vec<RunId> = self.runs.read().await.keys().cloned().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }
}
