//! gRPC binding of [`NotificationService`], the same shape tonic's generated
//! server code has: one `Service` that dispatches on the request path.

use std::future::Future;
use std::task::{Context, Poll};

use server::{GrpcRegistrable, GrpcServer, RegistrationError};
use tonic::body::BoxBody;
use tonic::codec::ProstCodec;
use tonic::codegen::{empty_body, http, Body, BoxFuture, StdError};
use tonic::server::{Grpc, NamedService, UnaryService};
use tonic::Status;

use crate::descriptor;
use crate::service::NotificationService;

pub const SERVICE_NAME: &str = "notification.v1.NotificationService";

/// Full method paths, shared with the gateway client.
pub mod paths {
    pub const PUT_INSTANCE: &str = "/notification.v1.NotificationService/PutInstance";
    pub const REMOVE_TOKEN: &str = "/notification.v1.NotificationService/RemoveToken";
    pub const REMOVE_INSTANCE: &str = "/notification.v1.NotificationService/RemoveInstance";
    pub const SEND: &str = "/notification.v1.NotificationService/Send";
    pub const SEND_ALL: &str = "/notification.v1.NotificationService/SendAll";
    pub const SEND_MULTICAST: &str = "/notification.v1.NotificationService/SendMulticast";
    pub const LIST_NOTIFICATIONS: &str = "/notification.v1.NotificationService/ListNotifications";
}

#[derive(Clone)]
pub struct NotificationServer {
    inner: NotificationService,
}

impl NotificationServer {
    pub fn new(inner: NotificationService) -> Self {
        Self { inner }
    }

    pub fn service(&self) -> &NotificationService {
        &self.inner
    }
}

impl NamedService for NotificationServer {
    const NAME: &'static str = SERVICE_NAME;
}

/// Adapts an async fn over the decoded message to tonic's unary service.
struct Unary<F>(F);

impl<Req, Resp, F, Fut> UnaryService<Req> for Unary<F>
where
    F: FnMut(Req) -> Fut,
    Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
{
    type Response = Resp;
    type Future = BoxFuture<tonic::Response<Resp>, Status>;

    fn call(&mut self, request: tonic::Request<Req>) -> Self::Future {
        let fut = (self.0)(request.into_inner());
        Box::pin(async move { fut.await.map(tonic::Response::new) })
    }
}

async fn unary<B, Req, Resp, F, Fut>(req: http::Request<B>, f: F) -> http::Response<BoxBody>
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
    Req: prost::Message + Default + Send + 'static,
    Resp: prost::Message + Send + 'static,
    F: FnMut(Req) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
{
    let mut grpc = Grpc::new(ProstCodec::<Resp, Req>::default());
    grpc.unary(Unary(f), req).await
}

fn unimplemented_response() -> http::Response<BoxBody> {
    let mut response = http::Response::new(empty_body());
    let headers = response.headers_mut();
    headers.insert(Status::GRPC_STATUS, (tonic::Code::Unimplemented as i32).into());
    headers.insert(http::header::CONTENT_TYPE, tonic::metadata::GRPC_CONTENT_TYPE);
    response
}

impl<B> tower::Service<http::Request<B>> for NotificationServer
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<BoxBody>;
    type Error = std::convert::Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let svc = self.inner.clone();
        Box::pin(async move {
            let res = match req.uri().path() {
                paths::PUT_INSTANCE => {
                    unary(req, move |m| {
                        let svc = svc.clone();
                        async move { svc.put_instance(m).await }
                    })
                    .await
                }
                paths::REMOVE_TOKEN => {
                    unary(req, move |m| {
                        let svc = svc.clone();
                        async move { svc.remove_token(m).await }
                    })
                    .await
                }
                paths::REMOVE_INSTANCE => {
                    unary(req, move |m| {
                        let svc = svc.clone();
                        async move { svc.remove_instance(m).await }
                    })
                    .await
                }
                paths::SEND => {
                    unary(req, move |m| {
                        let svc = svc.clone();
                        async move { svc.send(m).await }
                    })
                    .await
                }
                paths::SEND_ALL => {
                    unary(req, move |m| {
                        let svc = svc.clone();
                        async move { svc.send_all(m).await }
                    })
                    .await
                }
                paths::SEND_MULTICAST => {
                    unary(req, move |m| {
                        let svc = svc.clone();
                        async move { svc.send_multicast(m).await }
                    })
                    .await
                }
                paths::LIST_NOTIFICATIONS => {
                    unary(req, move |m| {
                        let svc = svc.clone();
                        async move { svc.list_notifications(m).await }
                    })
                    .await
                }
                _ => unimplemented_response(),
            };
            Ok(res)
        })
    }
}

impl GrpcRegistrable for NotificationService {
    fn register(&self, server: &mut GrpcServer) -> Result<(), RegistrationError> {
        server
            .add_file_descriptor(descriptor::empty_file_descriptor())
            .add_file_descriptor(descriptor::file_descriptor())
            .add_service(NotificationServer::new(self.clone()))?;
        Ok(())
    }
}
