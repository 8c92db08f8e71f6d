//! gRPC API surface

pub mod grpc;
pub mod middleware;
pub mod proto;

pub use grpc::PubSubGrpcServer;
