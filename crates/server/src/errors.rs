use std::io;
use std::time::Duration;

use axum::http::Method;
use thiserror::Error;

/// Failures while wiring services onto the backends. All of them are fatal
/// to startup; nothing is retried and earlier registrations are not undone.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("gRPC service `{0}` is already registered")]
    DuplicateService(&'static str),
    #[error("gateway route {method} {path} is already registered")]
    DuplicateRoute { method: Method, path: String },
    #[error("gateway route {path}: unsupported method {method}")]
    UnsupportedMethod { method: Method, path: String },
    #[error("invalid gateway dial target `{target}`: {source}")]
    Dial {
        target: String,
        #[source]
        source: tonic::transport::Error,
    },
    #[error("cannot build gRPC reflection service: {0}")]
    Reflection(String),
    #[error("gateway registration for `{service}` failed: {message}")]
    Gateway { service: String, message: String },
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error("server terminated: {0}")]
    Serve(#[source] io::Error),
    #[error("in-flight requests did not drain within {0:?}")]
    ShutdownTimeout(Duration),
    #[error("serve task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
