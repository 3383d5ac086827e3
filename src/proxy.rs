//! Proxy addresses and the ordered, immutable pool they form.

use crate::error::{ProxyRotationError, Result};

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Protocol spoken to the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyScheme {
    #[default]
    Http,
    Https,
    Socks5,
    Socks5h,
}

impl ProxyScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyScheme::Http => "http",
            ProxyScheme::Https => "https",
            ProxyScheme::Socks5 => "socks5",
            ProxyScheme::Socks5h => "socks5h",
        }
    }
}

impl FromStr for ProxyScheme {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(ProxyScheme::Http),
            "https" => Ok(ProxyScheme::Https),
            "socks5" => Ok(ProxyScheme::Socks5),
            "socks5h" => Ok(ProxyScheme::Socks5h),
            other => Err(format!("unsupported proxy scheme `{}`", other)),
        }
    }
}

/// A single forward proxy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProxyAddress {
    #[serde(default)]
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ProxyAddress {
    /// Create an unauthenticated HTTP proxy address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: ProxyScheme::Http,
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    /// Attach basic credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Use a different proxy protocol.
    pub fn with_scheme(mut self, scheme: ProxyScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Render the address as a URL, credentials included.
    pub fn to_url(&self) -> Result<Url> {
        let invalid = |reason: &str| ProxyRotationError::InvalidProxy {
            input: self.to_string(),
            reason: reason.to_string(),
        };

        let mut url = Url::parse(&format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port))
            .map_err(|e| invalid(&e.to_string()))?;
        if let Some(username) = &self.username {
            url.set_username(username)
                .map_err(|_| invalid("cannot carry credentials"))?;
            url.set_password(self.password.as_deref())
                .map_err(|_| invalid("cannot carry credentials"))?;
        }
        Ok(url)
    }

    /// Convert the address to a reqwest::Proxy routing all traffic.
    pub fn to_reqwest_proxy(&self) -> Result<reqwest::Proxy> {
        let url = self.to_url()?;
        Ok(reqwest::Proxy::all(url)?)
    }
}

/// Credentials are never printed.
impl fmt::Display for ProxyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

impl FromStr for ProxyAddress {
    type Err = ProxyRotationError;

    /// Accepts `host:port`, `host:port:user:pass` and `scheme://[user:pass@]host:port`.
    fn from_str(s: &str) -> Result<Self> {
        let input = s.trim();
        let invalid = |reason: String| ProxyRotationError::InvalidProxy {
            input: input.to_string(),
            reason,
        };

        if input.contains("://") {
            let url = Url::parse(input).map_err(|e| invalid(e.to_string()))?;
            let scheme = url.scheme().parse::<ProxyScheme>().map_err(invalid)?;
            let host = url
                .host_str()
                .ok_or_else(|| invalid("missing host".to_string()))?
                .to_string();
            let port = url
                .port_or_known_default()
                .ok_or_else(|| invalid("missing port".to_string()))?;
            let username = (!url.username().is_empty()).then(|| url.username().to_string());
            let password = url.password().map(str::to_string);
            return Ok(Self { scheme, host, port, username, password });
        }

        let parts: Vec<&str> = input.split(':').collect();
        let (host, port, credentials) = match parts.as_slice() {
            [host, port] => (*host, *port, None),
            [host, port, user, pass] => (*host, *port, Some((*user, *pass))),
            _ => return Err(invalid("expected host:port or host:port:user:pass".to_string())),
        };
        if host.is_empty() {
            return Err(invalid("missing host".to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| invalid(format!("bad port: {}", e)))?;

        let address = ProxyAddress::new(host, port);
        Ok(match credentials {
            Some((user, pass)) => address.with_credentials(user, pass),
            None => address,
        })
    }
}

/// Stable identifier of an ordered proxy list.
///
/// All shared state for a pool lives under this key, so a reordered or
/// reconfigured pool starts from a clean slate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey(String);

impl PoolKey {
    const LEN: usize = 16;

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered proxies, fixed for the lifetime of the process.
///
/// A proxy's identity is its index in this list.
#[derive(Debug, Clone)]
pub struct ProxyList {
    proxies: Vec<ProxyAddress>,
    key: PoolKey,
}

impl ProxyList {
    pub fn new(proxies: Vec<ProxyAddress>) -> Self {
        let key = Self::compute_key(&proxies);
        Self { proxies, key }
    }

    fn compute_key(proxies: &[ProxyAddress]) -> PoolKey {
        let mut hasher = Sha256::new();
        for proxy in proxies {
            hasher.update(proxy.scheme.as_str().as_bytes());
            hasher.update(b"://");
            if let Some(username) = &proxy.username {
                hasher.update(username.as_bytes());
                hasher.update(b":");
                hasher.update(proxy.password.as_deref().unwrap_or_default().as_bytes());
                hasher.update(b"@");
            }
            hasher.update(proxy.host.as_bytes());
            hasher.update(b":");
            hasher.update(proxy.port.to_string().as_bytes());
            hasher.update(b"\n");
        }
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(PoolKey::LEN);
        PoolKey(digest)
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ProxyAddress> {
        self.proxies.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProxyAddress> {
        self.proxies.iter()
    }
}
