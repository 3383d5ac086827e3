//! Round-robin selection shared by every caller of a pool.

use crate::error::Result;
use crate::store::{RotationStore, Selection, StoreKeys};

use log::debug;
use std::sync::Arc;
use std::time::Duration;

/// Picks proxies for one pool through the shared store.
///
/// The store's atomic selection is the only synchronization point; no lock
/// is held here. Under contention, or when unhealthy proxies are skipped,
/// callers may receive non-adjacent indices. Over time each healthy proxy
/// gets roughly `1 / pool_size` of the traffic.
#[derive(Clone)]
pub struct RotationCoordinator {
    store: Arc<dyn RotationStore>,
    keys: StoreKeys,
    pool_size: usize,
}

impl RotationCoordinator {
    pub fn new(store: Arc<dyn RotationStore>, keys: StoreKeys, pool_size: usize) -> Self {
        Self { store, keys, pool_size }
    }

    /// Select the next healthy proxy and report whether it is on cooldown
    /// for `endpoint`. Being on cooldown does not prevent the selection.
    pub async fn select_proxy(
        &self,
        endpoint: &str,
        cooldown: Duration,
        now_ms: u64,
    ) -> Result<Selection> {
        let selection = self
            .store
            .select_proxy(&self.keys, self.pool_size, endpoint, now_ms, cooldown)
            .await?;
        debug!(
            "Selected proxy #{} for {} (on cooldown: {})",
            selection.index, endpoint, selection.on_cooldown
        );
        Ok(selection)
    }

    /// Remember that `index` served `endpoint` at `now_ms`.
    pub async fn record_success(&self, index: usize, endpoint: &str, now_ms: u64) -> Result<()> {
        self.store.record_success(&self.keys, index, endpoint, now_ms).await
    }
}
