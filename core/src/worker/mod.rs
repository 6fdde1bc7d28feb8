//! Worker IPC: framing codec, connection pool, and forwarding client
//!
//! Workers serve a local stream socket whose path they announce as
//! `unix://<path>` when registering. Each request/response is one framed
//! message; the payload bytes are opaque at this layer.

pub mod client;
pub mod framing;
pub mod pool;

pub use client::WorkerClient;
pub use pool::{ConnectionPools, PoolConfig, WorkerConnection};

/// Strip the `unix://` scheme from a worker address, yielding the
/// filesystem path of its socket.
pub fn socket_path(worker_address: &str) -> &str {
    worker_address
        .strip_prefix("unix://")
        .unwrap_or(worker_address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_strips_scheme() {
        assert_eq!(socket_path("unix:///tmp/w.sock"), "/tmp/w.sock");
        assert_eq!(socket_path("/tmp/w.sock"), "/tmp/w.sock");
    }
}
