//! Worker management service
//!
//! Served on the private management port and consumed only by local
//! workers. This is the registry's sole mutator from outside the process:
//! workers register the models they serve after binding their socket and
//! deregister them on the way out.

use crate::generated::management::worker_management_server::WorkerManagement;
use crate::generated::management::{
    HeartbeatRequest, HeartbeatResponse, RegisterModelRequest, RegisterModelResponse,
    UnregisterModelRequest, UnregisterModelResponse,
};
use infermux_core::registry::ModelRegistry;
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// Worker-facing management service.
pub struct WorkerManagementImpl {
    registry: Arc<ModelRegistry>,
}

impl WorkerManagementImpl {
    /// Create the service around the shared registry.
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }
}

#[tonic::async_trait]
impl WorkerManagement for WorkerManagementImpl {
    async fn register_model(
        &self,
        request: Request<RegisterModelRequest>,
    ) -> Result<Response<RegisterModelResponse>, Status> {
        let req = request.into_inner();

        self.registry.register(
            &req.model_name,
            &req.model_version,
            &req.worker_address,
            &req.worker_id,
        );

        Ok(Response::new(RegisterModelResponse {
            success: true,
            message: "Model registered successfully".to_string(),
        }))
    }

    async fn unregister_model(
        &self,
        request: Request<UnregisterModelRequest>,
    ) -> Result<Response<UnregisterModelResponse>, Status> {
        let req = request.into_inner();

        let removed =
            self.registry
                .unregister_model(&req.model_name, &req.model_version, &req.worker_id);

        let message = if removed {
            "Model unregistered successfully"
        } else {
            "Model not found"
        };
        Ok(Response::new(UnregisterModelResponse {
            success: removed,
            message: message.to_string(),
        }))
    }

    async fn heartbeat(
        &self,
        request: Request<HeartbeatRequest>,
    ) -> Result<Response<HeartbeatResponse>, Status> {
        let req = request.into_inner();
        // Reserved for TTL-based pruning; accepting the call is the contract.
        tracing::debug!(worker_id = %req.worker_id, models = ?req.model_names, "heartbeat");
        Ok(Response::new(HeartbeatResponse { healthy: true }))
    }
}
