//! Per-worker connection pools
//!
//! One pool per worker endpoint, created lazily on first acquire. The pool
//! bounds concurrency per worker: `in_use + idle <= max_connections` at all
//! times. A slot is reserved before connecting so a slow connect cannot
//! oversubscribe the cap.

use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::sync::Mutex;

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum concurrent connections per worker endpoint
    pub max_connections_per_endpoint: usize,

    /// Bound on establishing a new connection
    pub connect_timeout: Duration,

    /// Recycle healthy connections instead of closing after one request.
    /// Workers that half-close after each response need this off.
    pub reuse_connections: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_endpoint: 10,
            connect_timeout: Duration::from_secs(5),
            reuse_connections: false,
        }
    }
}

/// A pooled connection to one worker socket
#[derive(Debug)]
pub struct WorkerConnection {
    pub(crate) stream: UnixStream,
    endpoint: String,
}

impl WorkerConnection {
    /// The worker endpoint this connection belongs to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[derive(Debug, Default)]
struct EndpointPool {
    idle: Vec<UnixStream>,
    in_use: usize,
}

/// Thread-safe set of per-endpoint connection pools
#[derive(Debug)]
pub struct ConnectionPools {
    pools: Mutex<HashMap<String, EndpointPool>>,
    config: PoolConfig,
    closed: AtomicBool,
}

impl ConnectionPools {
    /// Create the pool set.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            config,
            closed: AtomicBool::new(false),
        }
    }

    /// Acquire a connection for `endpoint` (a `unix://<path>` address).
    ///
    /// Hands out an idle connection when one exists; otherwise connects,
    /// provided the endpoint is below its cap. At the cap with nothing
    /// idle, fails with [`Error::PoolExhausted`]; callers treat that as a
    /// transient transport failure.
    pub async fn acquire(&self, endpoint: &str) -> Result<WorkerConnection> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::PoolClosed);
        }

        {
            let mut pools = self.pools.lock().await;
            let pool = pools.entry(endpoint.to_string()).or_default();

            if let Some(stream) = pool.idle.pop() {
                pool.in_use += 1;
                return Ok(WorkerConnection {
                    stream,
                    endpoint: endpoint.to_string(),
                });
            }

            if pool.in_use >= self.config.max_connections_per_endpoint {
                return Err(Error::PoolExhausted(endpoint.to_string()));
            }

            // Reserve the slot before connecting; released again on failure.
            pool.in_use += 1;
        }

        let path = super::socket_path(endpoint).to_string();
        let connected =
            tokio::time::timeout(self.config.connect_timeout, UnixStream::connect(&path)).await;

        match connected {
            Ok(Ok(stream)) => Ok(WorkerConnection {
                stream,
                endpoint: endpoint.to_string(),
            }),
            Ok(Err(e)) => {
                self.release_slot(endpoint).await;
                Err(Error::Transport(format!(
                    "failed to connect to {}: {}",
                    path, e
                )))
            }
            Err(_) => {
                self.release_slot(endpoint).await;
                Err(Error::Transport(format!(
                    "connect to {} timed out after {:?}",
                    path, self.config.connect_timeout
                )))
            }
        }
    }

    /// Return a connection. Healthy connections are recycled only when the
    /// pool policy allows it; everything else is closed. The slot taken by
    /// the matching `acquire` is freed exactly once.
    pub async fn release(&self, conn: WorkerConnection, healthy: bool) {
        let WorkerConnection { stream, endpoint } = conn;
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get_mut(&endpoint) {
            pool.in_use = pool.in_use.saturating_sub(1);
            if healthy && self.config.reuse_connections && !self.closed.load(Ordering::SeqCst) {
                pool.idle.push(stream);
                return;
            }
        }
        // Dropping the stream closes it.
    }

    /// Drop the pool for a deregistered endpoint, closing its idle
    /// connections. In-flight connections close when released.
    pub async fn remove_endpoint(&self, endpoint: &str) {
        let removed = self.pools.lock().await.remove(endpoint);
        if removed.is_some() {
            tracing::debug!(endpoint = %endpoint, "removed connection pool");
        }
    }

    /// Close every idle connection and refuse further acquires.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.pools.lock().await.clear();
        tracing::debug!("connection pools shut down");
    }

    /// `(in_use, idle)` counts for an endpoint.
    pub async fn counts(&self, endpoint: &str) -> (usize, usize) {
        let pools = self.pools.lock().await;
        pools
            .get(endpoint)
            .map(|pool| (pool.in_use, pool.idle.len()))
            .unwrap_or((0, 0))
    }

    async fn release_slot(&self, endpoint: &str) {
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get_mut(endpoint) {
            pool.in_use = pool.in_use.saturating_sub(1);
        }
    }
}
