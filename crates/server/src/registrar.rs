//! Builds the two backends (gRPC server, REST gateway mux) from a list of
//! services.

use std::collections::BTreeSet;
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::handler::Handler as AxumHandler;
use axum::http::{header, HeaderValue, Method, Request, Response, StatusCode};
use axum::routing::{on, MethodFilter};
use axum::Router;
use multiplexer::Handler;
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use tonic::body::BoxBody;
use tonic::server::NamedService;
use tonic::service::Routes;
use tonic::transport::{Channel, Endpoint};
use tower::Service as TowerService;
use tracing::{debug, info};

use crate::capability::Service;
use crate::errors::RegistrationError;

/// The shared gRPC server. Constructed once per run; services add themselves
/// through [`GrpcRegistrable`](crate::capability::GrpcRegistrable).
#[derive(Default)]
pub struct GrpcServer {
    routes: Option<Routes>,
    names: BTreeSet<&'static str>,
    descriptors: Vec<FileDescriptorProto>,
}

impl GrpcServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tonic service. A second service with the same fully-qualified
    /// name is rejected instead of shadowing the first.
    pub fn add_service<S>(&mut self, svc: S) -> Result<&mut Self, RegistrationError>
    where
        S: TowerService<Request<BoxBody>, Response = Response<BoxBody>, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        if !self.names.insert(S::NAME) {
            return Err(RegistrationError::DuplicateService(S::NAME));
        }
        self.routes = Some(match self.routes.take() {
            Some(routes) => routes.add_service(svc),
            None => Routes::new(svc),
        });
        debug!(grpc_service = S::NAME, "gRPC service added");
        Ok(self)
    }

    /// Make a proto file known to server reflection. Files are keyed by name;
    /// a second file with the same name is ignored.
    pub fn add_file_descriptor(&mut self, file: FileDescriptorProto) -> &mut Self {
        if !self.descriptors.iter().any(|known| known.name == file.name) {
            self.descriptors.push(file);
        }
        self
    }

    /// Register `grpc.reflection.v1.ServerReflection` describing every file
    /// added so far.
    pub fn add_reflection(&mut self) -> Result<&mut Self, RegistrationError> {
        let set = FileDescriptorSet { file: self.descriptors.clone() };
        let reflection = tonic_reflection::server::Builder::configure()
            .register_file_descriptor_set(set)
            .build_v1()
            .map_err(|e| RegistrationError::Reflection(e.to_string()))?;
        self.add_service(reflection)
    }

    pub fn service_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.names.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Handler for the multiplexer. With no services registered every call
    /// answers `UNIMPLEMENTED`.
    pub fn into_handler(self) -> Handler {
        match self.routes {
            // Routes 只接受 BoxBody 请求，先转成 axum Router 再装箱
            Some(routes) => Handler::new(routes.into_axum_router()),
            None => Handler::from_fn(|_req| async { grpc_unimplemented() }),
        }
    }
}

fn grpc_unimplemented() -> Response<Body> {
    let mut res = Response::new(Body::empty());
    let headers = res.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
    headers.insert("grpc-status", HeaderValue::from(tonic::Code::Unimplemented as i32));
    *res.status_mut() = StatusCode::OK;
    res
}

/// HTTP mux for the REST gateway. Routes are keyed by `(method, path)`;
/// registering the same pair twice is an error.
#[derive(Default)]
pub struct GatewayMux {
    router: Router,
    routes: BTreeSet<(String, String)>,
}

impl GatewayMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle<H, T, S>(
        &mut self,
        method: Method,
        path: &str,
        handler: H,
        state: S,
    ) -> Result<&mut Self, RegistrationError>
    where
        H: AxumHandler<T, S>,
        T: 'static,
        S: Clone + Send + Sync + 'static,
    {
        let filter = MethodFilter::try_from(method.clone()).map_err(|_| {
            RegistrationError::UnsupportedMethod { method: method.clone(), path: path.to_string() }
        })?;
        if !self.routes.insert((method.to_string(), path.to_string())) {
            return Err(RegistrationError::DuplicateRoute { method, path: path.to_string() });
        }
        let router = std::mem::take(&mut self.router);
        self.router = router.route(path, on(filter, handler).with_state(state));
        debug!(%method, %path, "gateway route added");
        Ok(self)
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn has_route(&self, method: &Method, path: &str) -> bool {
        self.routes.contains(&(method.to_string(), path.to_string()))
    }

    pub fn into_handler(self) -> Handler {
        Handler::new(self.router)
    }
}

/// How the gateway dials the gRPC backend. The backend is always this same
/// process, so the channel is plaintext.
#[derive(Debug, Clone, Default)]
pub struct DialOptions {
    pub connect_timeout: Option<Duration>,
    pub request_timeout: Option<Duration>,
}

/// Rewrite an unspecified bind address (`0.0.0.0`, `[::]`, `:port`) to loopback.
pub fn loopback_target(bind: &str) -> String {
    if let Ok(addr) = bind.parse::<SocketAddr>() {
        let ip = match addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        return SocketAddr::new(ip, addr.port()).to_string();
    }
    match bind.strip_prefix(':') {
        Some(port) => format!("127.0.0.1:{port}"),
        None => bind.to_string(),
    }
}

/// Lazily connected channel to the gRPC backend at `bind`. No I/O happens
/// here; the first call connects.
pub fn dial(bind: &str, opts: &DialOptions) -> Result<Channel, RegistrationError> {
    let target = format!("http://{}", loopback_target(bind));
    let mut endpoint = Endpoint::from_shared(target.clone())
        .map_err(|source| RegistrationError::Dial { target, source })?;
    if let Some(t) = opts.connect_timeout {
        endpoint = endpoint.connect_timeout(t);
    }
    if let Some(t) = opts.request_timeout {
        endpoint = endpoint.timeout(t);
    }
    Ok(endpoint.connect_lazy())
}

/// The two constructed backends.
pub struct Backends {
    pub grpc: GrpcServer,
    pub gateway: GatewayMux,
}

/// Boxed backends, ready to be placed behind multiplexer rules.
#[derive(Clone)]
pub struct BackendHandlers {
    pub grpc: Handler,
    pub gateway: Handler,
}

impl Backends {
    pub fn into_handlers(self) -> BackendHandlers {
        BackendHandlers { grpc: self.grpc.into_handler(), gateway: self.gateway.into_handler() }
    }
}

/// Construct both backends and register every service onto them, in the
/// order given. The first failure aborts; earlier registrations stay.
pub async fn build_backends(
    bind: &str,
    services: &[Arc<dyn Service>],
    opts: &DialOptions,
) -> Result<Backends, RegistrationError> {
    let mut grpc = GrpcServer::new();
    let mut gateway = GatewayMux::new();

    for svc in services {
        let name = svc.name();
        if let Some(g) = svc.as_grpc() {
            g.register(&mut grpc)?;
            info!(service = %name, capability = "grpc", "service registered");
        }
        if let Some(gw) = svc.as_gateway() {
            gw.register_gateway(&mut gateway, bind, opts).await?;
            info!(service = %name, capability = "gateway", %bind, "service registered");
        }
        if svc.as_grpc().is_none() && svc.as_gateway().is_none() {
            debug!(service = %name, "service exposes no capability; skipped");
        }
    }

    Ok(Backends { grpc, gateway })
}
