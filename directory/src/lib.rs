//! Infermux capability directory
//!
//! A small out-of-band service that maps capability offers to dispatcher
//! endpoints. Dispatchers register through a long-lived SSE control stream
//! (the stream is the liveness signal: when it closes, the entry goes
//! away) and remote clients resolve capability queries to an endpoint via
//! `GET /route`.

pub mod client;
pub mod registry;
pub mod server;

mod error;
pub use error::{Error, Result};

pub use client::DirectoryClient;
pub use registry::{DirectoryRegistry, ReplicaEntry, RouteMatch};
pub use server::{DirectoryServer, RegisterRequest, RouteResponse};
