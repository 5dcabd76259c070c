//! Multiplexed gRPC + REST gateway server.
//!
//! Services declare what they can do through [`capability`]; the
//! [`registrar`] builds a gRPC server and a gateway mux from them, and
//! [`serve`] puts both behind a single listener.

pub mod capability;
pub mod errors;
pub mod gateway;
pub mod registrar;
pub mod serve;

pub use capability::{GatewayRegistrable, GrpcRegistrable, Service};
pub use errors::{RegistrationError, ServeError};
pub use gateway::{GatewayClient, GatewayError};
pub use registrar::{build_backends, BackendHandlers, Backends, DialOptions, GatewayMux, GrpcServer};
pub use serve::{serve, HandlerFactory, Orchestrator, ServeBuilder, ServeConfig, ServeState};
