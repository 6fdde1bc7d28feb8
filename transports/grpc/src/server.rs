//! Tonic server setup for the dispatcher
//!
//! Runs the client-facing inference service and the private worker
//! management service on separate ports, each with keepalive tuning and
//! request tracing, both draining on the shared shutdown signal.

use crate::generated::inference::grpc_inference_service_server::GrpcInferenceServiceServer;
use crate::generated::management::worker_management_server::WorkerManagementServer;
use crate::{InferenceServiceImpl, WorkerManagementImpl};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::watch;
use tonic::transport::Server;
use tracing::info;

/// Dispatcher gRPC server pair.
pub struct GrpcServer {
    serve_addr: SocketAddr,
    management_addr: SocketAddr,
    inference: InferenceServiceImpl,
    management: WorkerManagementImpl,
}

impl GrpcServer {
    /// Create the server pair from already-built services.
    pub fn new(
        serve_addr: &str,
        management_addr: &str,
        inference: InferenceServiceImpl,
        management: WorkerManagementImpl,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self {
            serve_addr: serve_addr.parse()?,
            management_addr: management_addr.parse()?,
            inference,
            management,
        })
    }

    /// Serve both endpoints until `shutdown` flips to true (or its sender
    /// is dropped). A bind failure on either port aborts startup.
    pub async fn serve(
        self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let inference_server = Server::builder()
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .tcp_nodelay(true)
            .http2_keepalive_interval(Some(Duration::from_secs(30)))
            .http2_keepalive_timeout(Some(Duration::from_secs(10)))
            .trace_fn(|_| tracing::info_span!("inference_rpc"))
            .add_service(GrpcInferenceServiceServer::new(self.inference))
            .serve_with_shutdown(self.serve_addr, drained(shutdown.clone()));

        let management_server = Server::builder()
            .tcp_nodelay(true)
            .trace_fn(|_| tracing::info_span!("management_rpc"))
            .add_service(WorkerManagementServer::new(self.management))
            .serve_with_shutdown(self.management_addr, drained(shutdown));

        info!(addr = %self.serve_addr, "inference server listening");
        info!(addr = %self.management_addr, "management server listening");

        tokio::try_join!(inference_server, management_server)?;

        info!("grpc servers stopped");
        Ok(())
    }
}

async fn drained(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}
