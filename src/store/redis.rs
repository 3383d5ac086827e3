//! Redis-backed store shared across processes.

use super::{RotationStore, Selection, StoreKeys};
use crate::error::{ProxyRotationError, Result};

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use log::{debug, info};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Advances the rotation position, skips unhealthy proxies and reports the
/// cooldown state of the winner in one server-side step.
///
/// KEYS[1] rotation position
/// ARGV    unhealthy prefix, last-success prefix, pool size, endpoint,
///         now (ms), cooldown (ms)
/// Returns {index, on_cooldown}; index is -1 when every proxy is unhealthy.
const SELECT_SCRIPT: &str = r#"
local pool_size = tonumber(ARGV[3])
local now = tonumber(ARGV[5])
local cooldown = tonumber(ARGV[6])

local current = tonumber(redis.call('GET', KEYS[1]) or '0') or 0
local next_index = (current + 1) % pool_size
redis.call('SET', KEYS[1], next_index)

local selected = -1
for step = 0, pool_size - 1 do
    local candidate = (next_index + step) % pool_size
    if redis.call('EXISTS', ARGV[1] .. candidate) == 0 then
        selected = candidate
        break
    end
end

if selected < 0 then
    return {-1, 0}
end

local on_cooldown = 0
local last = redis.call('GET', ARGV[2] .. selected .. ':' .. ARGV[4])
if last and (now - tonumber(last)) < cooldown then
    on_cooldown = 1
end

return {selected, on_cooldown}
"#;

/// [`RotationStore`] on a Redis server.
///
/// Selection runs as a Lua script, so any number of processes may share one
/// server. Every command is bounded by `command_timeout`.
pub struct RedisStore {
    pool: Pool,
    script: ::redis::Script,
    command_timeout: Duration,
}

impl RedisStore {
    /// Create a store from a `redis://` URL. Connections are opened lazily.
    pub fn new(url: &str, command_timeout: Duration) -> Result<Self> {
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| ProxyRotationError::Config(format!("invalid Redis URL {}: {}", url, e)))?;

        Ok(Self {
            pool,
            script: ::redis::Script::new(SELECT_SCRIPT),
            command_timeout,
        })
    }

    /// Create a store and verify the server answers `PING`.
    pub async fn connect(url: &str, command_timeout: Duration) -> Result<Self> {
        let store = Self::new(url, command_timeout)?;
        store
            .bounded(async {
                let mut conn = store.connection().await?;
                let _: String = ::redis::cmd("PING").query_async(&mut conn).await?;
                Ok(())
            })
            .await?;
        info!("Redis rotation store connected");
        Ok(store)
    }

    async fn connection(&self) -> Result<Connection> {
        Ok(self.pool.get().await?)
    }

    async fn bounded<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        timeout(self.command_timeout, operation)
            .await
            .map_err(|_| ProxyRotationError::StoreTimeout(self.command_timeout))?
    }
}

#[async_trait]
impl RotationStore for RedisStore {
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

        let cooldown_ms = u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX);
        let (index, on_cooldown): (i64, i64) = self
            .bounded(async {
                let mut conn = self.connection().await?;
                Ok(self
                    .script
                    .key(keys.rotation())
                    .arg(keys.unhealthy_prefix())
                    .arg(keys.last_success_prefix())
                    .arg(pool_size)
                    .arg(endpoint)
                    .arg(now_ms)
                    .arg(cooldown_ms)
                    .invoke_async(&mut conn)
                    .await?)
            })
            .await?;

        debug!(
            "Redis selection for {}: index {}, on cooldown {}",
            endpoint, index, on_cooldown
        );
        let index = usize::try_from(index).map_err(|_| ProxyRotationError::SelectionExhausted)?;
        Ok(Selection {
            index,
            on_cooldown: on_cooldown == 1,
        })
    }

    async fn record_success(
        &self,
        keys: &StoreKeys,
        index: usize,
        endpoint: &str,
        now_ms: u64,
    ) -> Result<()> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            let _: () = ::redis::cmd("SET")
                .arg(keys.last_success(index, endpoint))
                .arg(now_ms)
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn mark_unhealthy(&self, keys: &StoreKeys, index: usize, ttl: Duration) -> Result<()> {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        self.bounded(async {
            let mut conn = self.connection().await?;
            let _: () = ::redis::cmd("SET")
                .arg(keys.unhealthy(index))
                .arg(1)
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn is_healthy(&self, keys: &StoreKeys, index: usize) -> Result<bool> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            let exists: bool = ::redis::cmd("EXISTS")
                .arg(keys.unhealthy(index))
                .query_async(&mut conn)
                .await?;
            Ok(!exists)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{ProxyAddress, ProxyList};

    #[test]
    fn rejects_malformed_url() {
        assert!(RedisStore::new("not a url", Duration::from_secs(1)).is_err());
    }

    /// Runs only when `REDIS_URL` points at a disposable server.
    #[tokio::test]
    async fn script_round_trip_against_live_server() {
        let Ok(url) = std::env::var("REDIS_URL") else {
            return;
        };
        let store = RedisStore::connect(&url, Duration::from_secs(2)).await.unwrap();
        let list = ProxyList::new(vec![
            ProxyAddress::new("live-test-a", 1),
            ProxyAddress::new("live-test-b", 2),
            ProxyAddress::new("live-test-c", 3),
        ]);
        let prefix = format!("test-{}-{}", std::process::id(), crate::utils::unix_millis());
        let keys = StoreKeys::new(&prefix, list.key());

        let cooldown = Duration::from_millis(500);
        let (store, keys) = (&store, &keys);
        let select = move |now_ms: u64| store.select_proxy(keys, 3, "e", now_ms, cooldown);

        // A fresh pool starts at 0 and the first advance lands on 1.
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(select(0).await.unwrap().index);
        }
        assert_eq!(seen, vec![1, 2, 0]);

        store.record_success(keys, 1, "e", 10_000).await.unwrap();
        let selection = select(10_499).await.unwrap();
        assert_eq!(selection, Selection { index: 1, on_cooldown: true });

        // Index 2 is next; the script skips it and wraps around to 0.
        store.mark_unhealthy(keys, 2, Duration::from_secs(5)).await.unwrap();
        assert!(!store.is_healthy(keys, 2).await.unwrap());
        let selection = select(10_499).await.unwrap();
        assert_eq!(selection, Selection { index: 0, on_cooldown: false });
        assert_eq!(select(10_499).await.unwrap().index, 0);

        let selection = select(10_501).await.unwrap();
        assert_eq!(selection, Selection { index: 1, on_cooldown: false });

        for index in 0..3 {
            store.mark_unhealthy(keys, index, Duration::from_secs(5)).await.unwrap();
        }
        let err = select(10_501).await.unwrap_err();
        assert!(matches!(err, ProxyRotationError::SelectionExhausted));
    }
}
