//! Infermux routing core
//!
//! Transport-agnostic building blocks of the infermux dispatcher:
//!
//! - [`registry::ModelRegistry`] maps model keys to worker endpoints
//! - [`worker`] holds the framed Unix-socket IPC: codec, connection pool,
//!   and the forwarding client
//! - [`supervisor::WorkerSupervisor`] owns worker child processes
//! - [`capability::Capability`] is the cluster-level offer/query model
//!
//! The RPC surfaces live in separate crates (`infermux-grpc` for the
//! KServe v2 and management services, `infermux-directory` for the
//! cluster directory); this crate has no dependency on tonic or axum.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod capability;
pub mod config;
pub mod registry;
pub mod supervisor;
pub mod worker;

mod error;
pub use error::{Error, Result};

/// Initialize tracing for a binary. Call once at startup.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
