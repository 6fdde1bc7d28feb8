//! One-hop delegation through the cluster directory
//!
//! A dispatcher that cannot satisfy a request locally may re-issue it to a
//! peer resolved via the directory, excluding itself from the match set.
//! The hop count travels in a request metadata header. Peer identity is
//! deliberately not used for loop detection, since identity can be NATted.
//! Depth is capped at one: a delegated request that misses again is
//! rejected instead of re-delegated.

use crate::dispatch::not_found_message;
use crate::generated::inference::grpc_inference_service_client::GrpcInferenceServiceClient;
use crate::generated::inference::{ModelInferRequest, ModelInferResponse};
use infermux_core::capability::Capability;
use infermux_directory::DirectoryClient;
use tonic::metadata::MetadataMap;
use tonic::{Request, Status};

/// Metadata header carrying the delegation hop count.
pub const DELEGATION_DEPTH_HEADER: &str = "x-delegation-depth";

/// Hop count carried by a request; absent or unparsable means zero.
pub fn delegation_depth(metadata: &MetadataMap) -> u32 {
    metadata
        .get(DELEGATION_DEPTH_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

/// Re-issues unsatisfiable requests to a peer dispatcher.
pub struct DelegationRouter {
    directory: DirectoryClient,
    replica_id: String,
}

impl DelegationRouter {
    /// Create a router that excludes `replica_id` (this dispatcher) from
    /// directory matches.
    pub fn new(directory: DirectoryClient, replica_id: impl Into<String>) -> Self {
        Self {
            directory,
            replica_id: replica_id.into(),
        }
    }

    /// Resolve the request's model capability through the directory and
    /// forward the request to the selected peer with the hop counter set.
    pub async fn delegate(&self, request: ModelInferRequest) -> Result<ModelInferResponse, Status> {
        let query = Capability::for_model(&request.model_name, &request.model_version);

        let target = self
            .directory
            .route(&query, Some(&self.replica_id))
            .await
            .map_err(|e| Status::unavailable(format!("directory lookup failed: {}", e)))?
            .ok_or_else(|| {
                Status::not_found(not_found_message(
                    &request.model_name,
                    &request.model_version,
                ))
            })?;

        tracing::info!(
            model = %request.model_name,
            replica_id = %target.replica_id,
            endpoint = %target.endpoint,
            "delegating request"
        );

        let mut client = GrpcInferenceServiceClient::connect(format!("http://{}", target.endpoint))
            .await
            .map_err(|e| {
                Status::unavailable(format!(
                    "failed to reach replica {}: {}",
                    target.replica_id, e
                ))
            })?;

        let mut delegated = Request::new(request);
        delegated.metadata_mut().insert(
            DELEGATION_DEPTH_HEADER,
            tonic::metadata::MetadataValue::from_static("1"),
        );

        let response = client.model_infer(delegated).await?;
        Ok(response.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_defaults_to_zero() {
        let metadata = MetadataMap::new();
        assert_eq!(delegation_depth(&metadata), 0);
    }

    #[test]
    fn depth_reads_header() {
        let mut metadata = MetadataMap::new();
        metadata.insert(
            DELEGATION_DEPTH_HEADER,
            tonic::metadata::MetadataValue::from_static("1"),
        );
        assert_eq!(delegation_depth(&metadata), 1);
    }

    #[test]
    fn garbage_header_reads_as_zero() {
        let mut metadata = MetadataMap::new();
        metadata.insert(
            DELEGATION_DEPTH_HEADER,
            tonic::metadata::MetadataValue::from_static("not-a-number"),
        );
        assert_eq!(delegation_depth(&metadata), 0);
    }
}
