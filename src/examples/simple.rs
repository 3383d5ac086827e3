//! Simple example of using reqwest-proxy-rotation.
//!
//! Set `REDIS_URL` to share rotation state with other processes; without it
//! an in-process store is used.

use reqwest_proxy_rotation::{
    FallbackChain, MemoryStore, ProxyAddress, ProxyPoolConfig, ProxyRotationMiddleware, RedisStore,
    RotationStore, TransportSettings,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let store: Arc<dyn RotationStore> = match std::env::var("REDIS_URL") {
        Ok(url) => Arc::new(RedisStore::connect(&url, Duration::from_millis(500)).await?),
        Err(_) => Arc::new(MemoryStore::new()),
    };

    let primary = ProxyPoolConfig::builder()
        .proxies(vec![
            ProxyAddress::new("127.0.0.1", 3128),
            ProxyAddress::new("127.0.0.1", 3129).with_credentials("user", "secret"),
        ])
        // the friends endpoint is the most aggressively rate limited
        .endpoint_rule("httpbin.org/anything/users/{id}/friends", Duration::from_secs(5))
        .endpoint_rule("httpbin.org/anything/users/{id}", Duration::from_secs(1))
        .default_cooldown(Duration::from_millis(200))
        .unhealthy_duration(Duration::from_secs(30))
        .request_timeout(Duration::from_secs(10))
        .build();

    let tunnel = ProxyPoolConfig::builder()
        .proxies(vec!["socks5://127.0.0.1:1080".parse()?])
        .request_timeout(Duration::from_secs(15))
        .key_prefix("tunnel")
        .build();

    let settings = TransportSettings::default();
    let chain = FallbackChain::new(
        ProxyRotationMiddleware::new("primary", primary, Arc::clone(&store), settings.clone())?,
        ProxyRotationMiddleware::new("tunnel", tunnel, store, settings)?,
    );

    let (total, healthy) = chain.primary().stats().await?;
    println!("Primary pool: {}/{} healthy proxies", healthy, total);

    let client = chain.client(reqwest::Client::new());

    println!("Sending request...");
    let response = client.get("https://httpbin.org/anything/users/42").send().await?;

    println!("Status: {}", response.status());
    println!("Response: {}", response.text().await?);

    chain.shutdown();
    Ok(())
}
