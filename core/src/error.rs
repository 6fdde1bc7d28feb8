//! Error types for infermux-core

use thiserror::Error;

/// Result type alias for infermux-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for infermux-core
#[derive(Debug, Error)]
pub enum Error {
    /// Local IPC failure: connect, send, receive, or a short read/write
    #[error("transport error: {0}")]
    Transport(String),

    /// Connection pool for an endpoint is at capacity with no idle connections
    #[error("connection pool exhausted for {0}")]
    PoolExhausted(String),

    /// Pool has been shut down; no further connections are handed out
    #[error("connection pool is shut down")]
    PoolClosed,

    /// Worker process lifecycle failure (spawn, readiness, termination)
    #[error("worker error: {0}")]
    Worker(String),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
