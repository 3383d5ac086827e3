//! In-process HTTP endpoints standing in for forward proxies and the origin.

#![allow(dead_code)]

use reqwest_proxy_rotation::error::Result;
use reqwest_proxy_rotation::{
    MemoryStore, ProxyAddress, ProxyPoolConfig, ProxyRotationError, ProxyRotationMiddleware,
    RotationStore, Selection, StoreKeys, TransportSettings,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const SERVED_BY: &str = "x-served-by";

#[derive(Clone, Copy)]
enum Behavior {
    Respond(u16),
    Hang,
}

/// Answers every request with a fixed status and an `x-served-by` header,
/// or accepts and never answers.
pub struct MockServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub async fn responding(label: &'static str) -> Self {
        Self::start(label, Behavior::Respond(200)).await
    }

    pub async fn with_status(label: &'static str, status: u16) -> Self {
        Self::start(label, Behavior::Respond(status)).await
    }

    pub async fn hanging() -> Self {
        Self::start("hanging", Behavior::Hang).await
    }

    async fn start(label: &'static str, behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(Self::serve(stream, label, behavior, Arc::clone(&counter)));
            }
        });

        Self { addr, hits, handle }
    }

    async fn serve(
        mut stream: TcpStream,
        label: &'static str,
        behavior: Behavior,
        hits: Arc<AtomicUsize>,
    ) {
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }
        hits.fetch_add(1, Ordering::SeqCst);

        match behavior {
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Behavior::Respond(status) => {
                let response = format!(
                    "HTTP/1.1 {} MOCK\r\n{}: {}\r\ncontent-length: {}\r\n\
                     connection: close\r\n\r\n{}",
                    status,
                    SERVED_BY,
                    label,
                    label.len(),
                    label
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        }
    }

    pub fn proxy_address(&self) -> ProxyAddress {
        ProxyAddress::new(self.addr.ip().to_string(), self.addr.port())
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// An address nothing listens on.
pub async fn refused_address() -> ProxyAddress {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    ProxyAddress::new(addr.ip().to_string(), addr.port())
}

pub fn memory_store() -> Arc<dyn RotationStore> {
    Arc::new(MemoryStore::new())
}

pub fn stage(
    name: &str,
    proxies: Vec<ProxyAddress>,
    store: Arc<dyn RotationStore>,
    request_timeout: Duration,
) -> ProxyRotationMiddleware {
    let config = ProxyPoolConfig::builder()
        .proxies(proxies)
        .request_timeout(request_timeout)
        .unhealthy_duration(Duration::from_secs(60))
        .key_prefix(name)
        .build();
    stage_with_config(name, config, store)
}

pub fn stage_with_config(
    name: &str,
    config: ProxyPoolConfig,
    store: Arc<dyn RotationStore>,
) -> ProxyRotationMiddleware {
    ProxyRotationMiddleware::new(name, config, store, TransportSettings::default()).unwrap()
}

/// A store that never answers.
pub struct StalledStore;

#[async_trait::async_trait]
impl RotationStore for StalledStore {
    async fn select_proxy(
        &self,
        _keys: &StoreKeys,
        _pool_size: usize,
        _endpoint: &str,
        _now_ms: u64,
        _cooldown: Duration,
    ) -> Result<Selection> {
        std::future::pending().await
    }

    async fn record_success(
        &self,
        _keys: &StoreKeys,
        _index: usize,
        _endpoint: &str,
        _now_ms: u64,
    ) -> Result<()> {
        std::future::pending().await
    }

    async fn mark_unhealthy(&self, _keys: &StoreKeys, _index: usize, _ttl: Duration) -> Result<()> {
        std::future::pending().await
    }

    async fn is_healthy(&self, _keys: &StoreKeys, _index: usize) -> Result<bool> {
        std::future::pending().await
    }
}

/// Selects through a real [`MemoryStore`], but stalls on every success
/// record and rejects every health mark.
#[derive(Default)]
pub struct FlakyWriteStore {
    pub inner: MemoryStore,
    pub rejected_marks: AtomicUsize,
}

#[async_trait::async_trait]
impl RotationStore for FlakyWriteStore {
    async fn select_proxy(
        &self,
        keys: &StoreKeys,
        pool_size: usize,
        endpoint: &str,
        now_ms: u64,
        cooldown: Duration,
    ) -> Result<Selection> {
        self.inner
            .select_proxy(keys, pool_size, endpoint, now_ms, cooldown)
            .await
    }

    async fn record_success(
        &self,
        _keys: &StoreKeys,
        _index: usize,
        _endpoint: &str,
        _now_ms: u64,
    ) -> Result<()> {
        std::future::pending().await
    }

    async fn mark_unhealthy(&self, _keys: &StoreKeys, _index: usize, _ttl: Duration) -> Result<()> {
        self.rejected_marks.fetch_add(1, Ordering::SeqCst);
        Err(ProxyRotationError::Store("READONLY replica".to_string()))
    }

    async fn is_healthy(&self, keys: &StoreKeys, index: usize) -> Result<bool> {
        self.inner.is_healthy(keys, index).await
    }
}

/// Direct dispatch client that ignores proxy environment variables.
pub fn direct() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

pub fn served_by(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(SERVED_BY)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
