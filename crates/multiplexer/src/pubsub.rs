//! Push-delivery envelope unwrapping.
//!
//! A push subscription POSTs a JSON envelope whose `message.data` field holds
//! the base64-encoded application payload:
//!
//! ```json
//! {"message": {"data": "eyJpZCI6MX0=", "attributes": {"k": "v"}, "messageId": "1"},
//!  "subscription": "projects/p/subscriptions/s"}
//! ```
//!
//! The unwrapper replaces the request body with the decoded payload and hands
//! the request to the gateway under its original method and path. Bad
//! envelopes are answered with a 4xx and never forwarded; redelivery is left
//! to the push subscription.

use std::collections::BTreeMap;

use axum::body::{Body, Bytes};
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http_body_util::LengthLimitError;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::handler::Handler;
use crate::observability::ENVELOPE_REJECTED_TOTAL;

pub const MESSAGE_ID_HEADER: &str = "x-pubsub-message-id";
pub const SUBSCRIPTION_HEADER: &str = "x-pubsub-subscription";
pub const ATTRIBUTE_HEADER_PREFIX: &str = "x-pubsub-attr-";

#[derive(Debug, Clone)]
pub struct PubSubOptions {
    /// Substring of the `User-Agent` that identifies the push agent.
    pub agent_marker: String,
    /// Upper bound on the envelope size read into memory.
    pub max_body_bytes: usize,
}

impl Default for PubSubOptions {
    fn default() -> Self {
        Self { agent_marker: "APIs-Google".to_string(), max_body_bytes: 16 * 1024 * 1024 }
    }
}

#[derive(Debug, Deserialize)]
pub struct PushEnvelope {
    pub message: Option<PushMessage>,
    #[serde(default)]
    pub subscription: Option<String>,
}

// 推送消息同时携带 messageId 与 message_id，这里只读取驼峰形式，其余字段忽略
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    pub data: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub publish_time: Option<String>,
}

/// Result of unwrapping one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unwrapped {
    pub payload: Bytes,
    pub message_id: Option<String>,
    pub subscription: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("invalid push envelope: {0}")]
    InvalidJson(String),
    #[error("push envelope has no message")]
    MissingMessage,
    #[error("push envelope message has no data")]
    MissingData,
    #[error("push message data is not valid base64: {0}")]
    InvalidBase64(String),
    #[error("push envelope exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("cannot read push envelope: {0}")]
    Read(String),
}

impl EnvelopeError {
    fn reason(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "invalid_json",
            Self::MissingMessage => "missing_message",
            Self::MissingData => "missing_data",
            Self::InvalidBase64(_) => "invalid_base64",
            Self::TooLarge { .. } => "too_large",
            Self::Read(_) => "read",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for EnvelopeError {
    fn into_response(self) -> axum::response::Response {
        (self.status(), Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}

/// Decode an envelope. Pure: bytes in, payload out. An empty `data` string is
/// a valid (empty) payload; an absent one is not.
pub fn unwrap_envelope(raw: &[u8]) -> Result<Unwrapped, EnvelopeError> {
    let envelope: PushEnvelope =
        serde_json::from_slice(raw).map_err(|e| EnvelopeError::InvalidJson(e.to_string()))?;
    let message = envelope.message.ok_or(EnvelopeError::MissingMessage)?;
    let data = message.data.ok_or(EnvelopeError::MissingData)?;
    let payload = STANDARD
        .decode(data.trim())
        .map_err(|e| EnvelopeError::InvalidBase64(e.to_string()))?;
    Ok(Unwrapped {
        payload: Bytes::from(payload),
        message_id: message.message_id,
        subscription: envelope.subscription,
        attributes: message.attributes,
    })
}

/// Read the envelope out of `req` and rebuild it around the inner payload.
pub async fn unwrap_request(
    req: Request<Body>,
    max_body_bytes: usize,
) -> Result<Request<Body>, EnvelopeError> {
    let declared = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > max_body_bytes) {
        return Err(EnvelopeError::TooLarge { limit: max_body_bytes });
    }

    let (mut parts, body) = req.into_parts();
    let raw = axum::body::to_bytes(body, max_body_bytes).await.map_err(|e| {
        let inner = e.into_inner();
        if inner.downcast_ref::<LengthLimitError>().is_some() {
            EnvelopeError::TooLarge { limit: max_body_bytes }
        } else {
            EnvelopeError::Read(inner.to_string())
        }
    })?;
    let unwrapped = unwrap_envelope(&raw)?;

    let headers = &mut parts.headers;
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(unwrapped.payload.len()));
    if let Some(id) = unwrapped.message_id.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
        headers.insert(MESSAGE_ID_HEADER, id);
    }
    if let Some(sub) = unwrapped.subscription.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
        headers.insert(SUBSCRIPTION_HEADER, sub);
    }
    for (key, value) in &unwrapped.attributes {
        let name = format!("{ATTRIBUTE_HEADER_PREFIX}{}", key.to_ascii_lowercase());
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => debug!(attribute = %key, "push attribute not representable as header; skipped"),
        }
    }

    Ok(Request::from_parts(parts, Body::from(unwrapped.payload)))
}

/// Wrap `next` (the gateway) with envelope unwrapping.
pub fn unwrap_handler(next: Handler, max_body_bytes: usize) -> Handler {
    Handler::from_fn(move |req: Request<Body>| {
        let next = next.clone();
        async move {
            let path = req.uri().path().to_owned();
            match unwrap_request(req, max_body_bytes).await {
                Ok(inner) => next.call(inner).await,
                Err(e) => {
                    ENVELOPE_REJECTED_TOTAL.with_label_values(&[e.reason()]).inc();
                    warn!(%path, error = %e, "push envelope rejected");
                    e.into_response()
                }
            }
        }
    })
}
