use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::body::{Body, Bytes, HttpBody};
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use axum::BoxError;
use futures::future::BoxFuture;
use tower::{Service, ServiceExt};
use tracing::error;

use crate::predicate::{self, Predicate};
use crate::pubsub::{self, PubSubOptions};

type HandlerFn = dyn Fn(Request<Body>) -> BoxFuture<'static, Response<Body>> + Send + Sync;

/// A fully formed request handler. Cheap to clone and shared by every
/// in-flight request; the wrapped backend must itself be safe for concurrent use.
#[derive(Clone)]
pub struct Handler(Arc<HandlerFn>);

impl Handler {
    /// Box any tower service (an `axum::Router`, tonic routes, ...). The
    /// service is cloned per request, as tower expects. A service error never
    /// escapes the request: it becomes a `500`.
    pub fn new<S, B>(svc: S) -> Self
    where
        S: Service<Request<Body>, Response = Response<B>> + Clone + Send + Sync + 'static,
        S::Error: Into<BoxError>,
        S::Future: Send + 'static,
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self(Arc::new(move |req: Request<Body>| -> BoxFuture<'static, Response<Body>> {
            let svc = svc.clone();
            Box::pin(async move {
                match svc.oneshot(req).await {
                    Ok(res) => res.map(Body::new),
                    Err(e) => {
                        let e: BoxError = e.into();
                        error!(error = %e, "handler failed");
                        StatusCode::INTERNAL_SERVER_ERROR.into_response()
                    }
                }
            })
        }))
    }

    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response<Body>> + Send + 'static,
    {
        Self(Arc::new(move |req: Request<Body>| -> BoxFuture<'static, Response<Body>> {
            Box::pin(f(req))
        }))
    }

    pub async fn call(&self, req: Request<Body>) -> Response<Body> {
        (self.0)(req).await
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler")
    }
}

/// An ordered (predicate, handler) pair. The multiplexer tries rules in the
/// order they were registered and stops at the first match.
#[derive(Clone)]
pub struct HandlerRule {
    name: &'static str,
    predicate: Predicate,
    handler: Handler,
}

impl HandlerRule {
    pub fn new<P>(name: &'static str, predicate: P, handler: Handler) -> Self
    where
        P: Fn(&Request<Body>) -> bool + Send + Sync + 'static,
    {
        Self { name, predicate: Arc::new(predicate), handler }
    }

    /// Routes HTTP/2 `application/grpc*` traffic to the gRPC server.
    pub fn grpc(handler: Handler) -> Self {
        Self { name: "grpc", predicate: predicate::grpc(), handler }
    }

    /// Routes push deliveries through the envelope unwrapper into `gateway`.
    pub fn pubsub(gateway: Handler, options: PubSubOptions) -> Self {
        Self {
            name: "pubsub",
            predicate: predicate::push_delivery(options.agent_marker.clone()),
            handler: pubsub::unwrap_handler(gateway, options.max_body_bytes),
        }
    }

    /// Catch-all rule; anything registered after it is unreachable.
    pub fn http(handler: Handler) -> Self {
        Self { name: "http", predicate: predicate::always(), handler }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn matches(&self, req: &Request<Body>) -> bool {
        (self.predicate)(req)
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }
}

impl fmt::Debug for HandlerRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRule").field("name", &self.name).finish_non_exhaustive()
    }
}
