//! One reusable HTTP transport per proxy.

use crate::error::Result;
use crate::proxy::ProxyList;

use log::{debug, info};
use parking_lot::RwLock;
use reqwest::cookie::Jar;
use reqwest::redirect::Policy;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Client behavior every per-proxy transport inherits from the caller.
#[derive(Clone)]
pub struct TransportSettings {
    /// Maximum redirect hops; `None` disables redirects.
    pub max_redirects: Option<usize>,
    /// Cookie jar shared with the caller's own client.
    pub cookie_jar: Option<Arc<Jar>>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            max_redirects: Some(DEFAULT_MAX_REDIRECTS),
            cookie_jar: None,
        }
    }
}

impl TransportSettings {
    fn redirect_policy(&self) -> Policy {
        match self.max_redirects {
            Some(hops) => Policy::limited(hops),
            None => Policy::none(),
        }
    }
}

/// Transports indexed like the proxy list they were built from.
///
/// Built once and only read afterwards, until [`TransportPool::shutdown`]
/// drops them all at once.
pub struct TransportPool {
    transports: RwLock<Vec<Client>>,
}

impl TransportPool {
    /// Build one client per proxy.
    pub fn build(
        proxies: &ProxyList,
        request_timeout: Duration,
        connect_timeout: Option<Duration>,
        settings: &TransportSettings,
    ) -> Result<Self> {
        let mut transports = Vec::with_capacity(proxies.len());
        for proxy in proxies.iter() {
            let mut builder = Client::builder()
                .proxy(proxy.to_reqwest_proxy()?)
                .timeout(request_timeout)
                .redirect(settings.redirect_policy());
            if let Some(connect_timeout) = connect_timeout {
                builder = builder.connect_timeout(connect_timeout);
            }
            if let Some(jar) = &settings.cookie_jar {
                builder = builder.cookie_provider(Arc::clone(jar));
            }
            transports.push(builder.build()?);
            debug!("Built transport for proxy {}", proxy);
        }

        Ok(Self {
            transports: RwLock::new(transports),
        })
    }

    /// Transport for `index`, or `None` once shut down.
    pub fn get(&self, index: usize) -> Option<Client> {
        self.transports.read().get(index).cloned()
    }

    pub fn is_shut_down(&self) -> bool {
        self.transports.read().is_empty()
    }

    /// Drop every transport, closing idle connections.
    ///
    /// Requests already in flight hold their own client handle and finish
    /// normally. Calling this twice is harmless.
    pub fn shutdown(&self) {
        let drained = std::mem::take(&mut *self.transports.write());
        if !drained.is_empty() {
            info!("Closed {} proxy transports", drained.len());
        }
    }
}
