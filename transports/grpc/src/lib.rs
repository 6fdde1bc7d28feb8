//! gRPC surfaces of the infermux dispatcher
//!
//! Two services on two ports:
//! - the client-facing KServe v2 inference service ([`InferenceServiceImpl`])
//! - the private worker management service ([`WorkerManagementImpl`])
//!
//! [`GrpcServer`] wires both into tonic servers with graceful shutdown.

/// Generated protobuf bindings.
pub mod generated {
    /// KServe v2 inference protocol (package `inference`).
    pub mod inference {
        tonic::include_proto!("inference");
    }

    /// Worker management protocol (package `management`).
    pub mod management {
        tonic::include_proto!("management");
    }
}

pub mod delegation;
pub mod dispatch;
pub mod management;
pub mod server;

pub use delegation::{delegation_depth, DelegationRouter, DELEGATION_DEPTH_HEADER};
pub use dispatch::InferenceServiceImpl;
pub use management::WorkerManagementImpl;
pub use server::GrpcServer;
