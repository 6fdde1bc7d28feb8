//! Client for forwarding requests to worker processes
//!
//! Sends one framed request over a pooled Unix-socket connection and reads
//! one framed response. Payload bytes are opaque here: serialization of the
//! inference request and response belongs to the RPC layer. The client
//! never retries: retry policy stays with the caller so request identity
//! and side effects remain explicit.

use super::framing::{read_frame, write_frame};
use super::pool::{ConnectionPools, PoolConfig, WorkerConnection};
use crate::{Error, Result};
use std::time::Duration;

/// Forwards framed request/response pairs to worker sockets.
#[derive(Debug)]
pub struct WorkerClient {
    pools: ConnectionPools,
    request_timeout: Duration,
}

impl WorkerClient {
    /// Create a client with the given pool policy and per-request bound.
    pub fn new(pool_config: PoolConfig, request_timeout: Duration) -> Self {
        Self {
            pools: ConnectionPools::new(pool_config),
            request_timeout,
        }
    }

    /// Send `request` to the worker at `endpoint` and return its response.
    ///
    /// Any failure discards the connection; only a connection that
    /// completed the full exchange is released healthy.
    pub async fn forward(&self, endpoint: &str, request: &[u8]) -> Result<Vec<u8>> {
        let mut conn = self.pools.acquire(endpoint).await?;

        match tokio::time::timeout(self.request_timeout, exchange(&mut conn, request)).await {
            Ok(Ok(response)) => {
                self.pools.release(conn, true).await;
                Ok(response)
            }
            Ok(Err(e)) => {
                tracing::warn!(endpoint = %endpoint, error = %e, "worker exchange failed");
                self.pools.release(conn, false).await;
                Err(e)
            }
            Err(_) => {
                tracing::warn!(endpoint = %endpoint, "worker request timed out");
                self.pools.release(conn, false).await;
                Err(Error::Transport(format!(
                    "request to {} timed out after {:?}",
                    endpoint, self.request_timeout
                )))
            }
        }
    }

    /// Drop pooled connections for a deregistered worker endpoint.
    pub async fn remove_endpoint(&self, endpoint: &str) {
        self.pools.remove_endpoint(endpoint).await;
    }

    /// Close all connections and refuse further forwards.
    pub async fn shutdown(&self) {
        self.pools.shutdown().await;
    }
}

async fn exchange(conn: &mut WorkerConnection, request: &[u8]) -> Result<Vec<u8>> {
    write_frame(&mut conn.stream, request).await?;
    read_frame(&mut conn.stream).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    /// Worker double: reads one framed request per connection, responds
    /// with the payload reversed, then half-closes like the real workers.
    fn spawn_reversing_worker(listener: UnixListener) {
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };
                tokio::spawn(async move {
                    if let Ok(request) = read_frame(&mut stream).await {
                        let mut response = request;
                        response.reverse();
                        let _ = write_frame(&mut stream, &response).await;
                    }
                });
            }
        });
    }

    #[tokio::test]
    async fn forward_round_trips_one_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.sock");
        let listener = UnixListener::bind(&path).unwrap();
        spawn_reversing_worker(listener);

        let client = WorkerClient::new(PoolConfig::default(), Duration::from_secs(5));
        let endpoint = format!("unix://{}", path.display());

        let response = client.forward(&endpoint, b"abc").await.unwrap();
        assert_eq!(response, b"cba");

        // The worker half-closes per request; a second forward reconnects.
        let response = client.forward(&endpoint, b"xyz").await.unwrap();
        assert_eq!(response, b"zyx");
    }

    #[tokio::test]
    async fn dead_endpoint_is_transport_error() {
        let client = WorkerClient::new(PoolConfig::default(), Duration::from_secs(1));
        let err = client
            .forward("unix:///nonexistent/worker.sock", b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn worker_closing_mid_response_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.sock");
        let listener = UnixListener::bind(&path).unwrap();

        // Accept, read the request, then close without answering.
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };
                let _ = read_frame(&mut stream).await;
                drop(stream);
            }
        });

        let client = WorkerClient::new(PoolConfig::default(), Duration::from_secs(5));
        let endpoint = format!("unix://{}", path.display());

        let err = client.forward(&endpoint, b"ping").await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn unresponsive_worker_hits_request_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.sock");
        let listener = UnixListener::bind(&path).unwrap();

        // Accept and hold the connection open without ever responding.
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };
                held.push(stream);
            }
        });

        let client = WorkerClient::new(PoolConfig::default(), Duration::from_millis(200));
        let endpoint = format!("unix://{}", path.display());

        let err = client.forward(&endpoint, b"ping").await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
