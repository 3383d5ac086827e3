//! # reqwest-proxy-rotation
//!
//! Rotating forward-proxy middleware for reqwest.
//!
//! Each request is routed through the next healthy proxy of a pool. Rotation
//! position, health marks and per-endpoint pacing live in a shared store
//! (Redis or in-process), so many tasks and processes can share one pool.
//! Proxies that time out are excluded for a while, and a request the pool
//! cannot serve falls through to the next stage: a second "tunnel" pool,
//! then direct dispatch.

pub mod cancel;
pub mod chain;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod health;
pub mod middleware;
pub mod pool;
pub mod proxy;
pub mod rotation;
pub mod store;
mod utils;

pub use cancel::CancellationSignal;
pub use chain::FallbackChain;
pub use config::{ProxyPoolConfig, ProxyPoolConfigBuilder};
pub use endpoint::{normalize, EndpointClassifier, EndpointRule};
pub use error::ProxyRotationError;
pub use health::HealthTracker;
pub use middleware::ProxyRotationMiddleware;
pub use pool::{TransportPool, TransportSettings};
pub use proxy::{PoolKey, ProxyAddress, ProxyList, ProxyScheme};
pub use rotation::RotationCoordinator;
pub use store::{MemoryStore, RedisStore, RotationStore, Selection, StoreKeys};
pub use utils::parse_proxy_list;
