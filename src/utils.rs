//! Utility functions for the proxy rotation layer.

use crate::error::Result;
use crate::proxy::ProxyAddress;

use log::warn;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock time in Unix milliseconds, shared by every process using a store.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Parse an ordered proxy list, one address per line.
///
/// Blank lines and `#` comments are skipped. In strict mode the first bad
/// line is an error; otherwise it is logged and skipped.
pub fn parse_proxy_list(content: &str, strict: bool) -> Result<Vec<ProxyAddress>> {
    let mut proxies = Vec::new();
    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.parse::<ProxyAddress>() {
            Ok(proxy) => proxies.push(proxy),
            Err(e) if strict => return Err(e),
            Err(e) => warn!("Skipping proxy list line {}: {}", number + 1, e),
        }
    }
    Ok(proxies)
}
