//! Error types for the reqwest-proxy-rotation crate.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the rotation layer.
///
/// Upstream HTTP statuses are never represented here: any response that made
/// it back through a proxy is returned to the caller untouched.
#[derive(Debug, Error)]
pub enum ProxyRotationError {
    /// Every proxy in the pool is currently marked unhealthy.
    #[error("No proxy available in pool")]
    SelectionExhausted,

    /// The shared store rejected or failed a command.
    #[error("shared store error: {0}")]
    Store(String),

    /// A shared store round trip did not finish in time.
    #[error("shared store operation timed out after {0:?}")]
    StoreTimeout(Duration),

    /// The caller's cancellation signal fired.
    #[error("request cancelled by caller")]
    Cancelled,

    /// The request cannot be replayed through another proxy.
    #[error("Request object is not cloneable. Are you passing a streaming body?")]
    UncloneableRequest,

    /// A proxy address could not be parsed or turned into a transport.
    #[error("invalid proxy address `{input}`: {reason}")]
    InvalidProxy { input: String, reason: String },

    /// An endpoint pattern could not be compiled.
    #[error("invalid endpoint pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// The configuration is malformed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Building or using an HTTP transport failed.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

impl From<redis::RedisError> for ProxyRotationError {
    fn from(err: redis::RedisError) -> Self {
        ProxyRotationError::Store(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for ProxyRotationError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        ProxyRotationError::Store(format!("failed to get connection: {}", err))
    }
}

/// Result alias used across the crate.
pub type Result<T, E = ProxyRotationError> = std::result::Result<T, E>;
