//! Notification companion service: keeps track of app instances and their
//! push tokens, exposed over gRPC and the REST gateway.

pub mod descriptor;
pub mod errors;
pub mod gateway;
pub mod grpc;
pub mod messages;
pub mod service;
pub mod storage;

pub use errors::StoreError;
pub use grpc::NotificationServer;
pub use service::NotificationService;
pub use storage::{DocumentStore, JsonDocumentStore, WriteMode};
