//! Request predicates used by the built-in rules.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, Version};

/// A side-effect free test over an inbound request. Predicates only look at
/// the request head; they never touch the body.
pub type Predicate = Arc<dyn Fn(&Request<Body>) -> bool + Send + Sync>;

pub const GRPC_CONTENT_TYPE: &str = "application/grpc";

/// gRPC requires HTTP/2 and an `application/grpc*` content type
/// (`application/grpc`, `application/grpc+proto`, ...).
pub fn is_grpc(req: &Request<Body>) -> bool {
    req.version() == Version::HTTP_2
        && req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with(GRPC_CONTENT_TYPE))
            .unwrap_or(false)
}

/// Push deliveries are POSTs whose `User-Agent` carries the agent marker.
pub fn is_push_delivery(req: &Request<Body>, agent_marker: &str) -> bool {
    req.method() == Method::POST
        && req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|ua| ua.contains(agent_marker))
            .unwrap_or(false)
}

pub fn grpc() -> Predicate {
    Arc::new(is_grpc)
}

pub fn push_delivery(agent_marker: impl Into<String>) -> Predicate {
    let marker = agent_marker.into();
    Arc::new(move |req: &Request<Body>| is_push_delivery(req, &marker))
}

pub fn always() -> Predicate {
    Arc::new(|_: &Request<Body>| true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method, version: Version, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri("/x").version(version);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn grpc_needs_http2_and_content_type() {
        let ok = request(Method::POST, Version::HTTP_2, &[("content-type", "application/grpc")]);
        assert!(is_grpc(&ok));

        let proto = request(Method::POST, Version::HTTP_2, &[("content-type", "application/grpc+proto")]);
        assert!(is_grpc(&proto));

        let http1 = request(Method::POST, Version::HTTP_11, &[("content-type", "application/grpc")]);
        assert!(!is_grpc(&http1));

        let json = request(Method::POST, Version::HTTP_2, &[("content-type", "application/json")]);
        assert!(!is_grpc(&json));

        let missing = request(Method::POST, Version::HTTP_2, &[]);
        assert!(!is_grpc(&missing));
    }

    #[test]
    fn push_delivery_matches_agent_on_post_only() {
        let ua = "APIs-Google; (+https://developers.google.com/webmasters/APIs-Google.html)";
        let post = request(Method::POST, Version::HTTP_11, &[("user-agent", ua)]);
        assert!(is_push_delivery(&post, "APIs-Google"));

        let get = request(Method::GET, Version::HTTP_11, &[("user-agent", ua)]);
        assert!(!is_push_delivery(&get, "APIs-Google"));

        let browser = request(Method::POST, Version::HTTP_11, &[("user-agent", "Mozilla/5.0")]);
        assert!(!is_push_delivery(&browser, "APIs-Google"));
    }

    #[test]
    fn always_matches_everything() {
        let p = always();
        assert!(p(&request(Method::GET, Version::HTTP_11, &[])));
    }
}
