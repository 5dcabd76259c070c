use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use futures::future::BoxFuture;
use tower::Service;
use tracing::debug;

use crate::handler::{Handler, HandlerRule};
use crate::observability::{REQUESTS_TOTAL, REQUEST_DURATION, UNMATCHED_TOTAL};

const DEFAULT_HANDLER: &str = "default";

struct Inner {
    rules: Vec<HandlerRule>,
    default: Option<Handler>,
}

/// The single request handler mounted on the listener.
///
/// Rule evaluation per request is strictly sequential and stops at the first
/// match; independent requests are dispatched concurrently with no ordering
/// between them. No state is shared between requests besides the immutable
/// rule list.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<Inner>,
}

/// Build a multiplexer over `rules` (kept in the given order) with an optional
/// fallback. Without a fallback, unmatched requests get `404 Not Found`.
pub fn make(default: Option<Handler>, rules: Vec<HandlerRule>) -> Multiplexer {
    Multiplexer { inner: Arc::new(Inner { rules, default }) }
}

impl Multiplexer {
    /// Name of the rule that would take `req`, `"default"` for the fallback.
    pub fn select(&self, req: &Request<Body>) -> Option<(&'static str, &Handler)> {
        self.inner
            .rules
            .iter()
            .find(|rule| rule.matches(req))
            .map(|rule| (rule.name(), rule.handler()))
            .or_else(|| self.inner.default.as_ref().map(|h| (DEFAULT_HANDLER, h)))
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.inner.rules.iter().map(HandlerRule::name).collect()
    }

    pub async fn dispatch(&self, req: Request<Body>) -> Response<Body> {
        let Some((name, handler)) = self.select(&req) else {
            UNMATCHED_TOTAL.inc();
            debug!(method = %req.method(), path = %req.uri().path(), "no handler matched");
            return not_found();
        };
        debug!(handler = name, method = %req.method(), path = %req.uri().path(), "request dispatched");
        REQUESTS_TOTAL.with_label_values(&[name]).inc();

        let started = Instant::now();
        let res = handler.call(req).await;
        REQUEST_DURATION
            .with_label_values(&[name])
            .observe(started.elapsed().as_secs_f64());
        res
    }
}

fn not_found() -> Response<Body> {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "no handler matched the request"})),
    )
        .into_response()
}

impl Service<Request<Body>> for Multiplexer {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response<Body>, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { Ok(this.dispatch(req).await) })
    }
}
