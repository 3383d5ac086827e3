//! Configuration for a rotating proxy pool.

use crate::endpoint::EndpointRule;
use crate::error::{ProxyRotationError, Result};
use crate::proxy::ProxyAddress;

use serde::Deserialize;
use std::time::Duration;

const DEFAULT_UNHEALTHY_MS: u64 = 60_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_KEY_PREFIX: &str = "proxy";

/// Configuration for one pool stage.
///
/// Loaded by whatever owns proxy provisioning; the field names match the
/// camelCase JSON it hands over.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyPoolConfig {
    /// Ordered proxies. Order defines proxy identity.
    #[serde(default)]
    pub proxies: Vec<ProxyAddress>,
    /// Pacing rules, first match wins.
    #[serde(default)]
    pub endpoint_rules: Vec<EndpointRule>,
    /// Cooldown for endpoints no rule matches.
    #[serde(default)]
    pub default_cooldown_ms: u64,
    /// How long a timed-out proxy stays excluded.
    #[serde(default = "default_unhealthy_ms")]
    pub unhealthy_duration_ms: u64,
    /// Timeout for one request through one proxy.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Timeout for establishing the proxy connection.
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    /// Bound on one shared-store round trip.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Namespace for this stage's keys in the shared store.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_unhealthy_ms() -> u64 {
    DEFAULT_UNHEALTHY_MS
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_store_timeout_ms() -> u64 {
    DEFAULT_STORE_TIMEOUT_MS
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

impl ProxyPoolConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ProxyPoolConfigBuilder {
        ProxyPoolConfigBuilder::new()
    }

    /// Parse a JSON document produced by an external loader.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ProxyRotationError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(ProxyRotationError::Config("requestTimeoutMs must be positive".to_string()));
        }
        if self.store_timeout_ms == 0 {
            return Err(ProxyRotationError::Config("storeTimeoutMs must be positive".to_string()));
        }
        if self.key_prefix.is_empty() || self.key_prefix.contains(':') {
            return Err(ProxyRotationError::Config(format!(
                "keyPrefix `{}` must be non-empty and free of ':'",
                self.key_prefix
            )));
        }
        Ok(())
    }

    pub fn default_cooldown(&self) -> Duration {
        Duration::from_millis(self.default_cooldown_ms)
    }

    pub fn unhealthy_duration(&self) -> Duration {
        Duration::from_millis(self.unhealthy_duration_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Builder for `ProxyPoolConfig`.
pub struct ProxyPoolConfigBuilder {
    proxies: Vec<ProxyAddress>,
    endpoint_rules: Vec<EndpointRule>,
    default_cooldown: Option<Duration>,
    unhealthy_duration: Option<Duration>,
    request_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    store_timeout: Option<Duration>,
    key_prefix: Option<String>,
}

impl ProxyPoolConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            proxies: Vec::new(),
            endpoint_rules: Vec::new(),
            default_cooldown: None,
            unhealthy_duration: None,
            request_timeout: None,
            connect_timeout: None,
            store_timeout: None,
            key_prefix: None,
        }
    }

    /// Set the ordered proxy list.
    pub fn proxies(mut self, proxies: Vec<ProxyAddress>) -> Self {
        self.proxies = proxies;
        self
    }

    /// Append one pacing rule after those already added.
    pub fn endpoint_rule(mut self, pattern: impl Into<String>, cooldown: Duration) -> Self {
        self.endpoint_rules
            .push(EndpointRule::new(pattern, duration_ms(cooldown)));
        self
    }

    /// Set the cooldown for endpoints no rule matches.
    pub fn default_cooldown(mut self, cooldown: Duration) -> Self {
        self.default_cooldown = Some(cooldown);
        self
    }

    /// Set how long a timed-out proxy is excluded.
    pub fn unhealthy_duration(mut self, duration: Duration) -> Self {
        self.unhealthy_duration = Some(duration);
        self
    }

    /// Set the per-request timeout through one proxy.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the proxy connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the bound on one shared-store round trip.
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = Some(timeout);
        self
    }

    /// Set the namespace used in the shared store.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ProxyPoolConfig {
        ProxyPoolConfig {
            proxies: self.proxies,
            endpoint_rules: self.endpoint_rules,
            default_cooldown_ms: self.default_cooldown.map(duration_ms).unwrap_or(0),
            unhealthy_duration_ms: self
                .unhealthy_duration
                .map(duration_ms)
                .unwrap_or(DEFAULT_UNHEALTHY_MS),
            request_timeout_ms: self
                .request_timeout
                .map(duration_ms)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
            connect_timeout_ms: self.connect_timeout.map(duration_ms),
            store_timeout_ms: self
                .store_timeout
                .map(duration_ms)
                .unwrap_or(DEFAULT_STORE_TIMEOUT_MS),
            key_prefix: self.key_prefix.unwrap_or_else(default_key_prefix),
        }
    }
}

impl Default for ProxyPoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
