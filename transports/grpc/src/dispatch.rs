//! KServe v2 inference service
//!
//! The dispatch path: registry lookup, forward the serialized request to
//! the owning worker over the framed Unix-socket transport, parse the
//! worker's response. Health and metadata RPCs are answered locally.
//!
//! Status mapping: an unknown model is `NOT_FOUND` with a message naming
//! it (never converted to `INTERNAL`); transport and protocol failures on
//! the worker path are `INTERNAL` and are not retried here: a model key
//! maps to exactly one endpoint, so there is no second worker to try.

use crate::delegation::{delegation_depth, DelegationRouter};
use crate::generated::inference::grpc_inference_service_server::GrpcInferenceService;
use crate::generated::inference::{
    ModelInferRequest, ModelInferResponse, ModelMetadataRequest, ModelMetadataResponse,
    ModelReadyRequest, ModelReadyResponse, ServerLiveRequest, ServerLiveResponse,
    ServerMetadataRequest, ServerMetadataResponse, ServerReadyRequest, ServerReadyResponse,
};
use infermux_core::registry::{model_key, ModelRegistry};
use infermux_core::worker::WorkerClient;
use prost::Message;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// Platform string reported by ModelMetadata.
const PLATFORM: &str = "infermux";

pub(crate) fn not_found_message(model_name: &str, model_version: &str) -> String {
    format!("Model '{}' not found", model_key(model_name, model_version))
}

/// Client-facing inference service.
pub struct InferenceServiceImpl {
    registry: Arc<ModelRegistry>,
    worker_client: Arc<WorkerClient>,
    ready: Arc<AtomicBool>,
    server_name: String,
    server_version: String,
    delegation: Option<Arc<DelegationRouter>>,
}

impl InferenceServiceImpl {
    /// Create the service. `ready` is shared with the binary: true once
    /// startup completes, false again during shutdown.
    pub fn new(
        registry: Arc<ModelRegistry>,
        worker_client: Arc<WorkerClient>,
        ready: Arc<AtomicBool>,
        server_name: impl Into<String>,
        server_version: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            worker_client,
            ready,
            server_name: server_name.into(),
            server_version: server_version.into(),
            delegation: None,
        }
    }

    /// Enable one-hop delegation through the cluster directory for
    /// requests this dispatcher cannot satisfy locally.
    pub fn with_delegation(mut self, router: DelegationRouter) -> Self {
        self.delegation = Some(Arc::new(router));
        self
    }

    async fn forward_to_worker(
        &self,
        endpoint: &str,
        request: &ModelInferRequest,
    ) -> Result<ModelInferResponse, Status> {
        let payload = request.encode_to_vec();

        let response_bytes = self
            .worker_client
            .forward(endpoint, &payload)
            .await
            .map_err(|e| {
                tracing::warn!(
                    model = %request.model_name,
                    endpoint = %endpoint,
                    error = %e,
                    "failed to forward request to worker"
                );
                Status::internal(format!("failed to forward request to worker: {}", e))
            })?;

        ModelInferResponse::decode(response_bytes.as_slice())
            .map_err(|e| Status::internal(format!("invalid response from worker: {}", e)))
    }
}

#[tonic::async_trait]
impl GrpcInferenceService for InferenceServiceImpl {
    async fn server_live(
        &self,
        _request: Request<ServerLiveRequest>,
    ) -> Result<Response<ServerLiveResponse>, Status> {
        Ok(Response::new(ServerLiveResponse { live: true }))
    }

    async fn server_ready(
        &self,
        _request: Request<ServerReadyRequest>,
    ) -> Result<Response<ServerReadyResponse>, Status> {
        Ok(Response::new(ServerReadyResponse {
            ready: self.ready.load(Ordering::SeqCst),
        }))
    }

    async fn model_ready(
        &self,
        request: Request<ModelReadyRequest>,
    ) -> Result<Response<ModelReadyResponse>, Status> {
        let req = request.into_inner();
        let ready = self.registry.lookup(&req.name, &req.version).is_some();
        Ok(Response::new(ModelReadyResponse { ready }))
    }

    async fn server_metadata(
        &self,
        _request: Request<ServerMetadataRequest>,
    ) -> Result<Response<ServerMetadataResponse>, Status> {
        Ok(Response::new(ServerMetadataResponse {
            name: self.server_name.clone(),
            version: self.server_version.clone(),
            extensions: Vec::new(),
        }))
    }

    async fn model_metadata(
        &self,
        request: Request<ModelMetadataRequest>,
    ) -> Result<Response<ModelMetadataResponse>, Status> {
        let req = request.into_inner();
        Ok(Response::new(ModelMetadataResponse {
            name: req.name,
            versions: Vec::new(),
            platform: PLATFORM.to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }))
    }

    async fn model_infer(
        &self,
        request: Request<ModelInferRequest>,
    ) -> Result<Response<ModelInferResponse>, Status> {
        let depth = delegation_depth(request.metadata());
        let req = request.into_inner();

        tracing::debug!(
            model = %req.model_name,
            version = %req.model_version,
            id = %req.id,
            "ModelInfer"
        );

        match self.registry.lookup(&req.model_name, &req.model_version) {
            Some(endpoint) => {
                let response = self.forward_to_worker(&endpoint, &req).await?;
                Ok(Response::new(response))
            }
            None => {
                // One delegation hop at most; a delegated request that
                // still misses fails fast.
                if depth == 0 {
                    if let Some(router) = &self.delegation {
                        return router.delegate(req).await.map(Response::new);
                    }
                }
                Err(Status::not_found(not_found_message(
                    &req.model_name,
                    &req.model_version,
                )))
            }
        }
    }
}
