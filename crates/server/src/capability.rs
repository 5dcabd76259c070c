//! Capability contracts a business service may satisfy.
//!
//! A service opts into protocols by answering the two probes on [`Service`];
//! a pure gRPC service answers only `as_grpc`, a service that also wants REST
//! answers both. Nothing else is required of it.

use async_trait::async_trait;

use crate::errors::RegistrationError;
use crate::registrar::{DialOptions, GatewayMux, GrpcServer};

/// Opaque handle to business logic. Owned by the caller and shared with the
/// orchestrator through an `Arc`; the core never destroys it.
pub trait Service: Send + Sync {
    /// Name used in lifecycle logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn as_grpc(&self) -> Option<&dyn GrpcRegistrable> {
        None
    }

    fn as_gateway(&self) -> Option<&dyn GatewayRegistrable> {
        None
    }
}

/// Binds the service's RPC methods onto the shared gRPC server.
pub trait GrpcRegistrable: Send + Sync {
    fn register(&self, server: &mut GrpcServer) -> Result<(), RegistrationError>;
}

/// Mounts REST routes on the gateway mux that call back into the gRPC backend
/// at `bind` over a loopback channel.
#[async_trait]
pub trait GatewayRegistrable: Send + Sync {
    async fn register_gateway(
        &self,
        mux: &mut GatewayMux,
        bind: &str,
        opts: &DialOptions,
    ) -> Result<(), RegistrationError>;
}
