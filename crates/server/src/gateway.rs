//! REST → gRPC translation helpers used by gateway registrations.

use axum::http::uri::PathAndQuery;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tonic::codec::ProstCodec;
use tonic::metadata::MetadataMap;
use tonic::transport::Channel;
use tonic::{Code, Status};
use tracing::debug;

use crate::errors::RegistrationError;
use crate::registrar::{dial, DialOptions};

/// Headers copied from the REST request into gRPC metadata.
const FORWARDED_HEADERS: &[&str] = &["authorization", "x-request-id"];
const FORWARDED_PREFIX: &str = "x-pubsub-";

/// Loopback client from the gateway mux to the gRPC backend.
#[derive(Clone, Debug)]
pub struct GatewayClient {
    channel: Channel,
}

impl GatewayClient {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    pub fn dial(bind: &str, opts: &DialOptions) -> Result<Self, RegistrationError> {
        Ok(Self::new(dial(bind, opts)?))
    }

    /// Invoke a unary method by its full path (`/pkg.Service/Method`).
    pub async fn unary<Req, Resp>(
        &self,
        path: &'static str,
        message: Req,
        headers: &HeaderMap,
    ) -> Result<Resp, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("gRPC backend not ready: {e}")))?;

        let mut request = tonic::Request::new(message);
        *request.metadata_mut() = MetadataMap::from_headers(forwarded_headers(headers));
        debug!(%path, "gateway forwarding to gRPC");

        let codec = ProstCodec::<Req, Resp>::default();
        let response = grpc.unary(request, PathAndQuery::from_static(path), codec).await?;
        Ok(response.into_inner())
    }
}

fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| {
            let name = name.as_str();
            FORWARDED_HEADERS.contains(&name) || name.starts_with(FORWARDED_PREFIX)
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// HTTP status for a gRPC code, following the grpc-gateway mapping.
pub fn http_status(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        Code::InvalidArgument | Code::FailedPrecondition | Code::OutOfRange => StatusCode::BAD_REQUEST,
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists | Code::Aborted => StatusCode::CONFLICT,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::Unknown | Code::Internal | Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// A gRPC status surfaced over REST.
#[derive(Debug)]
pub struct GatewayError(pub Status);

impl From<Status> for GatewayError {
    fn from(status: Status) -> Self {
        Self(status)
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = http_status(self.0.code());
        let body = serde_json::json!({
            "code": self.0.code() as i32,
            "message": self.0.message(),
        });
        (status, Json(body)).into_response()
    }
}
