//! Temporary exclusion of proxies that stopped answering in time.

use crate::error::Result;
use crate::store::{RotationStore, StoreKeys};

use log::warn;
use std::sync::Arc;
use std::time::Duration;

/// Health marks for one pool.
///
/// Only transport timeouts mark a proxy. A proxy that relayed any HTTP
/// response, 5xx included, is healthy as far as this tracker is concerned.
#[derive(Clone)]
pub struct HealthTracker {
    store: Arc<dyn RotationStore>,
    keys: StoreKeys,
    exclusion: Duration,
}

impl HealthTracker {
    pub fn new(store: Arc<dyn RotationStore>, keys: StoreKeys, exclusion: Duration) -> Self {
        Self { store, keys, exclusion }
    }

    /// Exclude `index` for the configured duration.
    pub async fn mark_unhealthy(&self, index: usize) -> Result<()> {
        self.mark_unhealthy_for(index, self.exclusion).await
    }

    /// Exclude `index` for `duration`; re-marking resets the expiry.
    pub async fn mark_unhealthy_for(&self, index: usize, duration: Duration) -> Result<()> {
        warn!("Marking proxy #{} unhealthy for {:?}", index, duration);
        self.store.mark_unhealthy(&self.keys, index, duration).await
    }

    pub async fn is_healthy(&self, index: usize) -> Result<bool> {
        self.store.is_healthy(&self.keys, index).await
    }

    /// Count healthy proxies among the first `pool_size` indices.
    pub async fn healthy_count(&self, pool_size: usize) -> Result<usize> {
        let mut healthy = 0;
        for index in 0..pool_size {
            if self.is_healthy(index).await? {
                healthy += 1;
            }
        }
        Ok(healthy)
    }
}
