//! Shared state backing rotation, health and pacing.
//!
//! Everything a pool needs to coordinate with other callers (in this process
//! or in others) lives behind [`RotationStore`]. Implementations must make
//! [`RotationStore::select_proxy`] a single atomic step; callers never read
//! the rotation position and write it back themselves.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use crate::error::Result;
use crate::proxy::PoolKey;

use async_trait::async_trait;
use std::time::Duration;

/// Outcome of a successful selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// Index of the chosen proxy in its pool.
    pub index: usize,
    /// The chosen proxy served this endpoint less than one cooldown ago.
    pub on_cooldown: bool,
}

/// Key layout for one pool, namespaced by prefix and pool key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreKeys {
    base: String,
}

impl StoreKeys {
    pub fn new(prefix: &str, pool_key: &PoolKey) -> Self {
        Self {
            base: format!("{}:{}", prefix, pool_key),
        }
    }

    pub fn rotation(&self) -> String {
        format!("{}:rotation", self.base)
    }

    pub fn unhealthy_prefix(&self) -> String {
        format!("{}:unhealthy:", self.base)
    }

    pub fn unhealthy(&self, index: usize) -> String {
        format!("{}{}", self.unhealthy_prefix(), index)
    }

    pub fn last_success_prefix(&self) -> String {
        format!("{}:last_success:", self.base)
    }

    pub fn last_success(&self, index: usize, endpoint: &str) -> String {
        format!("{}{}:{}", self.last_success_prefix(), index, endpoint)
    }
}

/// Backend holding rotation positions, health marks and pacing records.
#[async_trait]
pub trait RotationStore: Send + Sync {
    /// Advance the rotation position by one and resolve the first healthy
    /// index at or after it, all in one atomic step.
    ///
    /// Fails with [`crate::ProxyRotationError::SelectionExhausted`] when a full
    /// cycle finds no healthy proxy. The position advances either way.
    async fn select_proxy(
        &self,
        keys: &StoreKeys,
        pool_size: usize,
        endpoint: &str,
        now_ms: u64,
        cooldown: Duration,
    ) -> Result<Selection>;

    /// Overwrite the last-success timestamp for `(index, endpoint)`.
    async fn record_success(
        &self,
        keys: &StoreKeys,
        index: usize,
        endpoint: &str,
        now_ms: u64,
    ) -> Result<()>;

    /// Exclude `index` from selection for `ttl`. Re-marking restarts the ttl.
    async fn mark_unhealthy(&self, keys: &StoreKeys, index: usize, ttl: Duration) -> Result<()>;

    /// True iff `index` carries no unexpired unhealthy mark.
    async fn is_healthy(&self, keys: &StoreKeys, index: usize) -> Result<bool>;
}

/// `now - last < cooldown`, saturating for clocks that step backwards.
pub(crate) fn within_cooldown(last_ms: u64, now_ms: u64, cooldown: Duration) -> bool {
    (now_ms.saturating_sub(last_ms) as u128) < cooldown.as_millis()
}
