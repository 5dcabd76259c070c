//! Serve orchestrator: one listener, both backends behind the multiplexer,
//! graceful stop on cancellation.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use multiplexer::{make, HandlerRule, PubSubOptions};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnResponse, TraceLayer};
use tracing::{error, info, warn, Level};

use crate::capability::Service;
use crate::errors::ServeError;
use crate::registrar::{build_backends, BackendHandlers, DialOptions};

/// Builds a custom rule once the backends exist, so it can target either of them.
pub type HandlerFactory = Box<dyn FnOnce(&BackendHandlers) -> HandlerRule + Send>;
type ListenCallback = Box<dyn FnOnce(SocketAddr) + Send>;
type ExitCallback = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeState {
    Configuring,
    Listening,
    Running,
    ShuttingDown,
    Stopped,
}

/// Validated serve options. Produced by [`ServeBuilder::build`].
pub struct ServeConfig {
    host: String,
    port: Option<u16>,
    services: Vec<Arc<dyn Service>>,
    grpc: bool,
    gateway: bool,
    pubsub: bool,
    reflection: bool,
    pubsub_options: PubSubOptions,
    rules: Vec<HandlerFactory>,
    dial_options: DialOptions,
    shutdown_timeout: Option<Duration>,
    on_listen: Option<ListenCallback>,
    on_exit: Option<ExitCallback>,
}

impl ServeConfig {
    pub fn builder() -> ServeBuilder {
        ServeBuilder::default()
    }

    pub fn bind_addr(&self) -> String {
        let port = self.port.unwrap_or(0);
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{port}", self.host)
        } else {
            format!("{}:{port}", self.host)
        }
    }
}

impl fmt::Debug for ServeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServeConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("services", &self.services.len())
            .field("grpc", &self.grpc)
            .field("gateway", &self.gateway)
            .field("pubsub", &self.pubsub)
            .field("reflection", &self.reflection)
            .field("rules", &self.rules.len())
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

/// Fluent construction of a [`ServeConfig`]. Nothing is enabled by default.
pub struct ServeBuilder {
    config: ServeConfig,
}

impl Default for ServeBuilder {
    fn default() -> Self {
        Self {
            config: ServeConfig {
                host: "0.0.0.0".to_string(),
                port: None,
                services: Vec::new(),
                grpc: false,
                gateway: false,
                pubsub: false,
                reflection: false,
                pubsub_options: PubSubOptions::default(),
                rules: Vec::new(),
                dial_options: DialOptions::default(),
                shutdown_timeout: None,
                on_listen: None,
                on_exit: None,
            },
        }
    }
}

impl ServeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map the `[server]` and `[pubsub]` sections of the application config.
    pub fn from_config(cfg: &configs::AppConfig) -> Self {
        let server = &cfg.server;
        let mut builder = Self::new()
            .host(server.host.clone())
            .port(server.port)
            .pubsub_options(PubSubOptions {
                agent_marker: cfg.pubsub.user_agent.clone(),
                max_body_bytes: cfg.pubsub.max_body_bytes,
            });
        if server.grpc {
            builder = builder.grpc();
        }
        if server.gateway {
            builder = builder.gateway();
        }
        if server.pubsub {
            builder = builder.pubsub();
        }
        if server.reflection {
            builder = builder.reflection();
        }
        if let Some(secs) = server.shutdown_timeout_secs {
            builder = builder.shutdown_timeout(Duration::from_secs(secs));
        }
        builder
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// `None` or `Some(0)` binds an ephemeral port.
    pub fn port(mut self, port: Option<u16>) -> Self {
        self.config.port = port.filter(|p| *p != 0);
        self
    }

    pub fn service(mut self, svc: Arc<dyn Service>) -> Self {
        self.config.services.push(svc);
        self
    }

    pub fn services<I>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Service>>,
    {
        self.config.services.extend(services);
        self
    }

    pub fn grpc(mut self) -> Self {
        self.config.grpc = true;
        self
    }

    pub fn gateway(mut self) -> Self {
        self.config.gateway = true;
        self
    }

    /// Push deliveries are forwarded to the gateway, so this turns it on too.
    pub fn pubsub(mut self) -> Self {
        self.config.pubsub = true;
        self.config.gateway = true;
        self
    }

    /// Serve `grpc.reflection.v1` next to the registered services. Only takes
    /// effect when gRPC is enabled.
    pub fn reflection(mut self) -> Self {
        self.config.reflection = true;
        self
    }

    pub fn pubsub_options(mut self, options: PubSubOptions) -> Self {
        self.config.pubsub_options = options;
        self
    }

    /// Extra rule evaluated after the built-in gRPC and push rules and before
    /// the gateway fallback. Rules keep their registration order.
    pub fn rule<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(&BackendHandlers) -> HandlerRule + Send + 'static,
    {
        self.config.rules.push(Box::new(factory));
        self
    }

    pub fn dial_options(mut self, opts: DialOptions) -> Self {
        self.config.dial_options = opts;
        self
    }

    /// Upper bound on the drain after cancellation. Unbounded when unset.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = Some(timeout);
        self
    }

    /// Called once with the resolved listen address, before the first
    /// request is accepted.
    pub fn on_listen<F>(mut self, f: F) -> Self
    where
        F: FnOnce(SocketAddr) + Send + 'static,
    {
        self.config.on_listen = Some(Box::new(f));
        self
    }

    /// Called once after the server stopped. Not called if startup failed.
    pub fn on_exit<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.config.on_exit = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Result<ServeConfig, ServeError> {
        let cfg = self.config;
        if !cfg.grpc && !cfg.gateway && cfg.rules.is_empty() {
            return Err(ServeError::InvalidConfig(
                "at least one of grpc, gateway, pubsub or a custom rule must be enabled".into(),
            ));
        }
        if cfg.host.trim().is_empty() {
            return Err(ServeError::InvalidConfig("host must not be empty".into()));
        }
        if cfg.pubsub_options.agent_marker.trim().is_empty() {
            return Err(ServeError::InvalidConfig("push agent marker must not be empty".into()));
        }
        Ok(cfg)
    }
}

/// Drives one serve run and publishes its [`ServeState`].
pub struct Orchestrator {
    config: ServeConfig,
    state: watch::Sender<ServeState>,
}

impl Orchestrator {
    pub fn new(config: ServeConfig) -> Self {
        let (state, _) = watch::channel(ServeState::Configuring);
        Self { config, state }
    }

    /// Observe state transitions. Receivers see `Stopped` even after `run`
    /// has returned.
    pub fn state(&self) -> watch::Receiver<ServeState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` is cancelled or the server fails.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServeError> {
        let Orchestrator { config, state } = self;
        let addr = config.bind_addr();
        let ServeConfig {
            services,
            grpc,
            gateway,
            pubsub,
            reflection,
            pubsub_options,
            rules: factories,
            dial_options,
            shutdown_timeout,
            on_listen,
            on_exit,
            ..
        } = config;

        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(source) => return Err(startup_failed(&state, ServeError::Bind { addr, source })),
        };
        let local = match listener.local_addr() {
            Ok(local) => local,
            Err(source) => return Err(startup_failed(&state, ServeError::Bind { addr, source })),
        };
        transition(&state, ServeState::Listening);

        let mut backends = match build_backends(&local.to_string(), &services, &dial_options).await {
            Ok(backends) => backends,
            Err(e) => return Err(startup_failed(&state, e.into())),
        };
        if grpc && reflection {
            if let Err(e) = backends.grpc.add_reflection() {
                return Err(startup_failed(&state, e.into()));
            }
        }
        if grpc && backends.grpc.is_empty() {
            warn!(service = "server", event = "grpc_empty", %local, "gRPC enabled but no service registered");
        }
        let grpc_services = backends.grpc.service_names().collect::<Vec<_>>().join(",");
        let handlers = backends.into_handlers();

        let mut rules = Vec::new();
        if grpc {
            rules.push(HandlerRule::grpc(handlers.grpc.clone()));
        }
        if pubsub {
            rules.push(HandlerRule::pubsub(handlers.gateway.clone(), pubsub_options));
        }
        for factory in factories {
            rules.push(factory(&handlers));
        }
        let default = gateway.then(|| handlers.gateway.clone());
        let mux = make(default, rules);
        let rule_names = mux.rule_names().join(",");

        let app = Router::new().fallback_service(mux).layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO).include_headers(false))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        );

        if let Some(on_listen) = on_listen {
            on_listen(local);
        }
        info!(
            service = "server",
            event = "listen",
            %local,
            grpc,
            gateway,
            pubsub,
            grpc_services = %grpc_services,
            rules = %rule_names,
            "serving"
        );

        let stop = shutdown.clone();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await
        });
        transition(&state, ServeState::Running);

        // 停机信号优先：serve 任务可能先于本任务观察到取消并返回
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                transition(&state, ServeState::ShuttingDown);
                info!(service = "server", event = "shutdown_signal", %local, "draining in-flight requests");
                drain(server, shutdown_timeout).await
            }
            res = &mut server => match res {
                Ok(Ok(())) if shutdown.is_cancelled() => Ok(()),
                // 未收到停机信号便退出，视为异常
                Ok(Ok(())) => Err(ServeError::Serve(io::Error::other("server exited unexpectedly"))),
                Ok(Err(e)) => Err(ServeError::Serve(e)),
                Err(e) => Err(ServeError::Task(e)),
            },
        };

        if let Err(e) = &result {
            error!(service = "server", event = "serve_failed", error = %e, "server stopped with error");
        }
        if let Some(on_exit) = on_exit {
            on_exit();
        }
        transition(&state, ServeState::Stopped);
        info!(service = "server", event = "stop", %local, "server stopped");
        result
    }
}

fn transition(state: &watch::Sender<ServeState>, next: ServeState) {
    state.send_replace(next);
    info!(service = "server", event = "state", state = ?next, "serve state changed");
}

/// Startup never reached `Running`: publish `Stopped` and skip `on_exit`.
fn startup_failed(state: &watch::Sender<ServeState>, err: ServeError) -> ServeError {
    error!(service = "server", event = "startup_failed", error = %err, "server failed to start");
    transition(state, ServeState::Stopped);
    err
}

/// Wait for the serve task to finish draining, bounded by `limit`.
async fn drain(mut server: JoinHandle<io::Result<()>>, limit: Option<Duration>) -> Result<(), ServeError> {
    let joined = match limit {
        Some(limit) => match tokio::time::timeout(limit, &mut server).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(service = "server", event = "shutdown_timeout", ?limit, "drain timed out; aborting");
                server.abort();
                return Err(ServeError::ShutdownTimeout(limit));
            }
        },
        None => server.await,
    };
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ServeError::Serve(e)),
        Err(e) => Err(ServeError::Task(e)),
    }
}

/// Run the multiplexed server described by `config` until `shutdown` fires.
pub async fn serve(config: ServeConfig, shutdown: CancellationToken) -> Result<(), ServeError> {
    Orchestrator::new(config).run(shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_requires_a_protocol() {
        let err = ServeBuilder::new().build().unwrap_err();
        assert!(matches!(err, ServeError::InvalidConfig(_)));
        assert!(ServeBuilder::new().grpc().build().is_ok());
        assert!(ServeBuilder::new()
            .rule(|h: &BackendHandlers| HandlerRule::http(h.gateway.clone()))
            .build()
            .is_ok());
    }

    #[test]
    fn pubsub_implies_gateway() {
        let cfg = ServeBuilder::new().pubsub().build().unwrap();
        assert!(cfg.pubsub && cfg.gateway && !cfg.grpc);
    }

    #[test]
    fn bind_addr_handles_ephemeral_and_ipv6() {
        let cfg = ServeBuilder::new().grpc().host("127.0.0.1").port(Some(0)).build().unwrap();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:0");
        let cfg = ServeBuilder::new().grpc().host("::1").port(Some(8080)).build().unwrap();
        assert_eq!(cfg.bind_addr(), "[::1]:8080");
    }

    #[test]
    fn from_config_maps_server_section() {
        let app = configs::parse(
            r#"
            [server]
            host = "127.0.0.1"
            port = 9090
            grpc = false
            gateway = false
            pubsub = true
            reflection = true
            shutdown_timeout_secs = 3

            [pubsub]
            user_agent = "Push-Agent"
            "#,
        )
        .unwrap();
        let cfg = ServeBuilder::from_config(&app).build().unwrap();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:9090");
        assert!(!cfg.grpc && cfg.gateway && cfg.pubsub && cfg.reflection);
        assert_eq!(cfg.pubsub_options.agent_marker, "Push-Agent");
        assert_eq!(cfg.shutdown_timeout, Some(Duration::from_secs(3)));
    }
}
