//! Middleware implementation for reqwest.

use crate::cancel::{guarded, CancellationSignal};
use crate::config::ProxyPoolConfig;
use crate::endpoint::EndpointClassifier;
use crate::error::ProxyRotationError;
use crate::health::HealthTracker;
use crate::pool::{TransportPool, TransportSettings};
use crate::proxy::{PoolKey, ProxyList};
use crate::rotation::RotationCoordinator;
use crate::store::{RotationStore, Selection, StoreKeys};
use crate::utils::unix_millis;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest_middleware::{Error, Middleware, Next, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// One stage of the fallback chain: dispatches through a rotating proxy pool.
///
/// The primary and the tunnel stage are two instances of this type with
/// different configuration. A stage hands the request to `next` when its
/// pool is empty or every proxy is excluded; any HTTP response it gets back
/// through a proxy, whatever the status, is returned as-is.
#[derive(Clone)]
pub struct ProxyRotationMiddleware {
    inner: Arc<Stage>,
}

struct Stage {
    name: String,
    proxies: ProxyList,
    classifier: EndpointClassifier,
    rotation: RotationCoordinator,
    health: HealthTracker,
    transports: TransportPool,
    store_timeout: Duration,
}

impl Stage {
    /// Bound a store round trip so a stalled store cannot hold a request.
    async fn bounded<T>(
        &self,
        operation: impl Future<Output = std::result::Result<T, ProxyRotationError>>,
    ) -> std::result::Result<T, ProxyRotationError> {
        tokio::time::timeout(self.store_timeout, operation)
            .await
            .map_err(|_| ProxyRotationError::StoreTimeout(self.store_timeout))?
    }

    async fn select(
        &self,
        endpoint: &str,
        cooldown: Duration,
    ) -> std::result::Result<Selection, ProxyRotationError> {
        self.bounded(self.rotation.select_proxy(endpoint, cooldown, unix_millis()))
            .await
    }
}

impl ProxyRotationMiddleware {
    /// Build a stage named `name` (used in logs) backed by `store`.
    ///
    /// Compiles the endpoint rules and builds every transport up front.
    pub fn new(
        name: impl Into<String>,
        config: ProxyPoolConfig,
        store: Arc<dyn RotationStore>,
        settings: TransportSettings,
    ) -> std::result::Result<Self, ProxyRotationError> {
        config.validate()?;
        let name = name.into();
        let proxies = ProxyList::new(config.proxies.clone());
        let keys = StoreKeys::new(&config.key_prefix, proxies.key());

        let classifier =
            EndpointClassifier::new(&config.endpoint_rules, config.default_cooldown())?;
        let transports = TransportPool::build(
            &proxies,
            config.request_timeout(),
            config.connect_timeout(),
            &settings,
        )?;
        let rotation =
            RotationCoordinator::new(Arc::clone(&store), keys.clone(), proxies.len());
        let health = HealthTracker::new(store, keys, config.unhealthy_duration());

        info!(
            "Proxy stage '{}' initialized with {} proxies (pool key {})",
            name,
            proxies.len(),
            proxies.key()
        );

        Ok(Self {
            inner: Arc::new(Stage {
                name,
                proxies,
                classifier,
                rotation,
                health,
                transports,
                store_timeout: config.store_timeout(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn pool_key(&self) -> &PoolKey {
        self.inner.proxies.key()
    }

    pub fn len(&self) -> usize {
        self.inner.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.proxies.is_empty()
    }

    pub fn health(&self) -> &HealthTracker {
        &self.inner.health
    }

    /// `(total, healthy)` proxy counts.
    pub async fn stats(&self) -> std::result::Result<(usize, usize), ProxyRotationError> {
        let total = self.len();
        let healthy = self.inner.health.healthy_count(total).await?;
        Ok((total, healthy))
    }

    /// Close this stage's idle proxy connections. Later requests go to `next`.
    pub fn shutdown(&self) {
        info!("Shutting down proxy stage '{}'", self.inner.name);
        self.inner.transports.shutdown();
    }
}

fn cancelled() -> Error {
    Error::Middleware(anyhow::Error::new(ProxyRotationError::Cancelled))
}

#[async_trait]
impl Middleware for ProxyRotationMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<reqwest::Response> {
        let stage = &self.inner;
        let signal = extensions.get::<CancellationSignal>().cloned();
        let signal = signal.as_ref();

        if stage.proxies.is_empty() {
            debug!("Proxy stage '{}' is empty, passing request on", stage.name);
            return next.run(req, extensions).await;
        }
        if stage.transports.is_shut_down() {
            debug!("Proxy stage '{}' is shut down, passing request on", stage.name);
            return next.run(req, extensions).await;
        }

        let (endpoint, cooldown) = stage.classifier.classify(req.url());

        // Every timeout excludes one proxy, so a full pool's worth of
        // attempts is enough to reach exhaustion.
        for attempt in 1..=stage.proxies.len() {
            let selection = match guarded(signal, stage.select(&endpoint, cooldown)).await {
                Err(_) => return Err(cancelled()),
                Ok(Ok(selection)) => selection,
                Ok(Err(ProxyRotationError::SelectionExhausted)) => {
                    info!(
                        "Proxy stage '{}' has no healthy proxy for {}, passing request on",
                        stage.name, endpoint
                    );
                    break;
                }
                Ok(Err(e)) => {
                    warn!("Proxy stage '{}' could not select a proxy: {}", stage.name, e);
                    break;
                }
            };

            // Shut down while this request was selecting.
            let Some(transport) = stage.transports.get(selection.index) else {
                debug!("Proxy stage '{}' is shut down, passing request on", stage.name);
                break;
            };
            let proxied_request = req.try_clone().ok_or_else(|| {
                Error::Middleware(anyhow::Error::new(ProxyRotationError::UncloneableRequest))
            })?;

            if selection.on_cooldown {
                debug!(
                    "Proxy #{} is on cooldown for {}, dispatching anyway",
                    selection.index, endpoint
                );
            }
            if let Some(proxy) = stage.proxies.get(selection.index) {
                debug!(
                    "Stage '{}' using proxy #{} ({}) for {} (attempt {})",
                    stage.name, selection.index, proxy, endpoint, attempt
                );
            }

            match guarded(signal, transport.execute(proxied_request)).await {
                Err(_) => return Err(cancelled()),
                Ok(Ok(response)) => {
                    let recorded = stage
                        .rotation
                        .record_success(selection.index, &endpoint, unix_millis());
                    if let Err(e) = stage.bounded(recorded).await {
                        warn!("Failed to record success for proxy #{}: {}", selection.index, e);
                    }
                    return Ok(response);
                }
                Ok(Err(err)) if err.is_timeout() => {
                    warn!(
                        "Request to {} timed out through proxy #{} (attempt {})",
                        endpoint, selection.index, attempt
                    );
                    let marked = stage.health.mark_unhealthy(selection.index);
                    if let Err(e) = stage.bounded(marked).await {
                        warn!("Failed to mark proxy #{} unhealthy: {}", selection.index, e);
                    }
                }
                Ok(Err(err)) => {
                    warn!(
                        "Request to {} failed through proxy #{}: {}",
                        endpoint, selection.index, err
                    );
                    return Err(Error::Reqwest(err));
                }
            }
        }

        if signal.is_some_and(CancellationSignal::is_cancelled) {
            return Err(cancelled());
        }
        next.run(req, extensions).await
    }
}
