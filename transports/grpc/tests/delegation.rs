//! Cross-dispatcher delegation through the directory: a dispatcher that
//! misses locally re-issues the request to the replica the directory
//! resolves, excluding itself, and a second hop is refused.

use infermux_core::capability::Capability;
use infermux_core::config::DispatcherConfig;
use infermux_core::registry::ModelRegistry;
use infermux_core::worker::{framing, WorkerClient};
use infermux_grpc::generated::inference::grpc_inference_service_server::{
    GrpcInferenceService, GrpcInferenceServiceServer,
};
use infermux_grpc::generated::inference::model_infer_response::InferOutputTensor;
use infermux_grpc::generated::inference::{
    InferTensorContents, ModelInferRequest, ModelInferResponse,
};
use infermux_directory::server::router;
use infermux_directory::{DirectoryClient, DirectoryRegistry};
use infermux_grpc::{DelegationRouter, InferenceServiceImpl, DELEGATION_DEPTH_HEADER};
use prost::Message;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixListener;
use tonic::{Code, Request};

fn service(registry: Arc<ModelRegistry>) -> InferenceServiceImpl {
    let config = DispatcherConfig::default();
    let worker_client = Arc::new(WorkerClient::new(
        config.pool_config(),
        Duration::from_secs(5),
    ));
    InferenceServiceImpl::new(
        registry,
        worker_client,
        Arc::new(AtomicBool::new(true)),
        "infermux-dispatcher",
        "0.2.0",
    )
}

/// Worker double for the "embed" model: answers every request with a
/// fixed fp32 vector.
fn spawn_embed_worker(listener: UnixListener) {
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            tokio::spawn(async move {
                while let Ok(bytes) = framing::read_frame(&mut stream).await {
                    let request = match ModelInferRequest::decode(bytes.as_slice()) {
                        Ok(request) => request,
                        Err(_) => return,
                    };
                    let response = ModelInferResponse {
                        model_name: request.model_name.clone(),
                        model_version: request.model_version.clone(),
                        id: request.id.clone(),
                        parameters: Default::default(),
                        outputs: vec![InferOutputTensor {
                            name: "embedding".to_string(),
                            datatype: "FP32".to_string(),
                            shape: vec![3],
                            parameters: Default::default(),
                            contents: Some(InferTensorContents {
                                fp32_contents: vec![0.1, 0.2, 0.3],
                                ..Default::default()
                            }),
                        }],
                        raw_output_contents: Vec::new(),
                    };
                    if framing::write_frame(&mut stream, &response.encode_to_vec())
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            });
        }
    });
}

fn embed_request() -> ModelInferRequest {
    ModelInferRequest {
        model_name: "embed".to_string(),
        model_version: "".to_string(),
        id: "req-emb".to_string(),
        parameters: Default::default(),
        inputs: Vec::new(),
        outputs: Vec::new(),
        raw_input_contents: Vec::new(),
    }
}

/// Two dispatchers behind one directory: A has no local "embed" model and
/// must delegate to B exactly once.
async fn start_cluster(dir: &tempfile::TempDir) -> (InferenceServiceImpl, Arc<DirectoryRegistry>) {
    // Dispatcher B serves "embed" from a framed worker.
    let socket = dir.path().join("embed.sock");
    spawn_embed_worker(UnixListener::bind(&socket).unwrap());

    let registry_b = Arc::new(ModelRegistry::new());
    registry_b.register("embed", "", &format!("unix://{}", socket.display()), "w-embed");
    let service_b = service(registry_b);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let b_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(GrpcInferenceServiceServer::new(service_b))
            .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    // Directory knows B offers {model=embed}.
    let directory_registry = Arc::new(DirectoryRegistry::new());
    directory_registry.register(
        "replica-b",
        &b_addr.to_string(),
        vec![Capability::for_model("embed", "")],
    );

    let app = router(Arc::clone(&directory_registry));
    let directory_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let directory_addr = directory_listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(directory_listener, app).await.unwrap();
    });

    // Dispatcher A has no local models but can delegate.
    let service_a = service(Arc::new(ModelRegistry::new())).with_delegation(DelegationRouter::new(
        DirectoryClient::new(format!("http://{}", directory_addr)),
        "replica-a",
    ));

    (service_a, directory_registry)
}

#[tokio::test]
async fn local_miss_delegates_once_through_directory() {
    let dir = tempfile::tempdir().unwrap();
    let (service_a, _directory) = start_cluster(&dir).await;

    let response = service_a
        .model_infer(Request::new(embed_request()))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(response.model_name, "embed");
    assert_eq!(response.id, "req-emb");
    assert_eq!(
        response.outputs[0].contents.as_ref().unwrap().fp32_contents,
        vec![0.1, 0.2, 0.3]
    );
}

#[tokio::test]
async fn delegated_request_is_never_redelegated() {
    let dir = tempfile::tempdir().unwrap();
    let (service_a, _directory) = start_cluster(&dir).await;

    // Simulate a request that already went through one hop.
    let mut request = Request::new(embed_request());
    request.metadata_mut().insert(
        DELEGATION_DEPTH_HEADER,
        tonic::metadata::MetadataValue::from_static("1"),
    );

    let status = service_a.model_infer(request).await.unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
    assert!(status.message().contains("Model 'embed' not found"));
}

#[tokio::test]
async fn delegation_miss_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (service_a, directory) = start_cluster(&dir).await;

    // Nobody offers this capability.
    let mut request = embed_request();
    request.model_name = "rerank".to_string();
    let status = service_a
        .model_infer(Request::new(request))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);

    // The exclusion rule: with B gone, even "embed" has no candidates.
    directory.list().iter().for_each(|entry| {
        assert_eq!(entry.replica_id, "replica-b");
    });
}
