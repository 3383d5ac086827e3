//! In-process store. Atomic within one process only.

use super::{within_cooldown, RotationStore, Selection, StoreKeys};
use crate::error::{ProxyRotationError, Result};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct State {
    positions: HashMap<String, usize>,
    unhealthy_until: HashMap<String, Instant>,
    last_success: HashMap<String, u64>,
}

impl State {
    fn is_healthy(&mut self, key: &str, now: Instant) -> bool {
        match self.unhealthy_until.get(key) {
            Some(until) if *until > now => false,
            Some(_) => {
                self.unhealthy_until.remove(key);
                true
            }
            None => true,
        }
    }
}

/// [`RotationStore`] kept in memory behind a single lock.
///
/// Suitable for single-process deployments and tests. Expiry follows the
/// tokio clock, so paused-time tests can step through exclusion windows.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current rotation position for a pool, if any selection happened yet.
    pub fn position(&self, keys: &StoreKeys) -> Option<usize> {
        self.state.lock().positions.get(&keys.rotation()).copied()
    }
}

#[async_trait]
impl RotationStore for MemoryStore {
    async fn select_proxy(
        &self,
        keys: &StoreKeys,
        pool_size: usize,
        endpoint: &str,
        now_ms: u64,
        cooldown: Duration,
    ) -> Result<Selection> {
        if pool_size == 0 {
            return Err(ProxyRotationError::SelectionExhausted);
        }

        let now = Instant::now();
        let mut state = self.state.lock();

        let position = state.positions.entry(keys.rotation()).or_insert(0);
        let next = (*position + 1) % pool_size;
        *position = next;

        let index = (0..pool_size)
            .map(|step| (next + step) % pool_size)
            .find(|&candidate| state.is_healthy(&keys.unhealthy(candidate), now))
            .ok_or(ProxyRotationError::SelectionExhausted)?;

        let on_cooldown = state
            .last_success
            .get(&keys.last_success(index, endpoint))
            .is_some_and(|&last| within_cooldown(last, now_ms, cooldown));

        Ok(Selection { index, on_cooldown })
    }

    async fn record_success(
        &self,
        keys: &StoreKeys,
        index: usize,
        endpoint: &str,
        now_ms: u64,
    ) -> Result<()> {
        self.state
            .lock()
            .last_success
            .insert(keys.last_success(index, endpoint), now_ms);
        Ok(())
    }

    async fn mark_unhealthy(&self, keys: &StoreKeys, index: usize, ttl: Duration) -> Result<()> {
        self.state
            .lock()
            .unhealthy_until
            .insert(keys.unhealthy(index), Instant::now() + ttl);
        Ok(())
    }

    async fn is_healthy(&self, keys: &StoreKeys, index: usize) -> Result<bool> {
        Ok(self.state.lock().is_healthy(&keys.unhealthy(index), Instant::now()))
    }
}
