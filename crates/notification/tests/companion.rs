use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::uri::PathAndQuery;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use notification::grpc::paths;
use prost::Message as _;
use notification::messages::{AppInstance, RemoveTokenRequest};
use notification::{DocumentStore, JsonDocumentStore, NotificationService};
use reqwest::StatusCode;
use serde_json::json;
use server::{serve, ServeBuilder, Service};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::codec::ProstCodec;
use tonic::transport::Channel;
use tonic_reflection::pb::v1::server_reflection_client::ServerReflectionClient;
use tonic_reflection::pb::v1::server_reflection_request::MessageRequest;
use tonic_reflection::pb::v1::server_reflection_response::MessageResponse;
use tonic_reflection::pb::v1::{ServerReflectionRequest, ServerReflectionResponse};

const PUSH_AGENT: &str = "APIs-Google; (+https://developers.google.com/webmasters/APIs-Google.html)";

struct TestApp {
    addr: SocketAddr,
    store: JsonDocumentStore,
    token: CancellationToken,
    task: JoinHandle<Result<(), server::ServeError>>,
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn doc_path(&self, id: &str) -> String {
        format!("test-fcm-companion-instances/{id}")
    }

    async fn stop(self) -> anyhow::Result<()> {
        self.token.cancel();
        self.task.await??;
        Ok(())
    }
}

async fn start() -> anyhow::Result<TestApp> {
    let store = JsonDocumentStore::in_memory();
    let svc = NotificationService::new(Arc::new(store.clone()), "test-").await?;
    let (tx, rx) = oneshot::channel();
    let cfg = ServeBuilder::new()
        .host("127.0.0.1")
        .grpc()
        .pubsub()
        .reflection()
        .service(Arc::new(svc) as Arc<dyn Service>)
        .on_listen(move |addr| {
            let _ = tx.send(addr);
        })
        .build()?;
    let token = CancellationToken::new();
    let task = tokio::spawn(serve(cfg, token.clone()));
    let addr = rx.await?;
    Ok(TestApp { addr, store, token, task })
}

async fn grpc_call<Req>(addr: SocketAddr, path: &'static str, msg: Req) -> Result<(), tonic::Status>
where
    Req: prost::Message + Send + Sync + 'static,
{
    let channel = Channel::from_shared(format!("http://{addr}"))
        .map_err(|e| tonic::Status::internal(e.to_string()))?
        .connect()
        .await
        .map_err(|e| tonic::Status::unavailable(e.to_string()))?;
    let mut grpc = tonic::client::Grpc::new(channel);
    grpc.ready().await.map_err(|e| tonic::Status::unavailable(e.to_string()))?;
    let codec = ProstCodec::<Req, ()>::default();
    grpc.unary(tonic::Request::new(msg), PathAndQuery::from_static(path), codec)
        .await
        .map(|_| ())
}

#[tokio::test]
async fn grpc_put_instance_reaches_store() -> anyhow::Result<()> {
    let app = start().await?;
    let msg = AppInstance { instance_id: "g-1".into(), token: "tok".into(), ..Default::default() };
    grpc_call(app.addr, paths::PUT_INSTANCE, msg).await?;

    let doc = app.store.get(&app.doc_path("g-1")).await?.expect("stored");
    assert_eq!(doc["token"], "tok");
    app.stop().await
}

#[tokio::test]
async fn grpc_errors_keep_their_codes() -> anyhow::Result<()> {
    let app = start().await?;
    let err = grpc_call(app.addr, paths::REMOVE_TOKEN, RemoveTokenRequest { instance_id: "nope".into() })
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::NotFound);

    let err = grpc_call(app.addr, "/notification.v1.NotificationService/Nope", RemoveTokenRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::Unimplemented);
    app.stop().await
}

#[tokio::test]
async fn rest_routes_go_through_the_grpc_backend() -> anyhow::Result<()> {
    let app = start().await?;
    let client = reqwest::Client::new();

    let res = client
        .put(app.url("/v1/instances/r-1"))
        .json(&json!({"token": "t1", "labels": {"os": "android"}}))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let doc = app.store.get(&app.doc_path("r-1")).await?.expect("stored");
    assert_eq!(doc["instanceId"], "r-1");
    assert_eq!(doc["labels"]["os"], "android");

    let res = client.delete(app.url("/v1/instances/r-1/token")).send().await?;
    assert_eq!(res.status(), StatusCode::OK);
    let doc = app.store.get(&app.doc_path("r-1")).await?.expect("still stored");
    assert_eq!(doc["token"], "");

    let res = client.delete(app.url("/v1/instances/r-1")).send().await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(app.store.get(&app.doc_path("r-1")).await?.is_none());

    let res = client.delete(app.url("/v1/instances/r-1/token")).send().await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = res.json().await?;
    assert_eq!(body["code"], 5);
    app.stop().await
}

#[tokio::test]
async fn unimplemented_methods_answer_501() -> anyhow::Result<()> {
    let app = start().await?;
    let res = reqwest::Client::new()
        .post(app.url("/v1/send"))
        .json(&json!({"instanceId": "i-1", "notification": {"title": "hi"}}))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NOT_IMPLEMENTED);

    let res = reqwest::Client::new()
        .post(app.url("/v1/send"))
        .json(&json!({"instanceId": "i-1"}))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    app.stop().await
}

#[tokio::test]
async fn push_delivery_registers_instance() -> anyhow::Result<()> {
    let app = start().await?;
    let payload = json!({"instanceId": "p-1", "token": "push-token"}).to_string();
    let envelope = json!({
        "message": {
            "data": STANDARD.encode(payload),
            "attributes": {"origin": "mobile"},
            "messageId": "42"
        },
        "subscription": "projects/demo/subscriptions/instances"
    });
    let res = reqwest::Client::new()
        .post(app.url("/v1/instances"))
        .header("user-agent", PUSH_AGENT)
        .json(&envelope)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let doc = app.store.get(&app.doc_path("p-1")).await?.expect("stored");
    assert_eq!(doc["token"], "push-token");

    let res = reqwest::Client::new()
        .post(app.url("/v1/instances"))
        .header("user-agent", PUSH_AGENT)
        .json(&json!({"message": {}}))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    app.stop().await
}

async fn reflect(addr: SocketAddr, request: MessageRequest) -> anyhow::Result<ServerReflectionResponse> {
    let channel = Channel::from_shared(format!("http://{addr}"))?.connect().await?;
    let mut client = ServerReflectionClient::new(channel);
    let req = ServerReflectionRequest { host: String::new(), message_request: Some(request) };
    let mut responses = client.server_reflection_info(futures::stream::iter(vec![req])).await?.into_inner();
    responses.message().await?.ok_or_else(|| anyhow::anyhow!("reflection stream closed"))
}

#[tokio::test]
async fn reflection_lists_and_describes_the_service() -> anyhow::Result<()> {
    let app = start().await?;

    let res = reflect(app.addr, MessageRequest::ListServices(String::new())).await?;
    let Some(MessageResponse::ListServicesResponse(list)) = res.message_response else {
        anyhow::bail!("unexpected reflection answer: {:?}", res.message_response);
    };
    let names: Vec<_> = list.service.iter().map(|s| s.name.as_str()).collect();
    assert!(names.contains(&notification::grpc::SERVICE_NAME));

    let res = reflect(
        app.addr,
        MessageRequest::FileContainingSymbol(notification::grpc::SERVICE_NAME.to_string()),
    )
    .await?;
    let Some(MessageResponse::FileDescriptorResponse(files)) = res.message_response else {
        anyhow::bail!("unexpected reflection answer: {:?}", res.message_response);
    };
    let mut described = Vec::new();
    for raw in &files.file_descriptor_proto {
        described.push(prost_types::FileDescriptorProto::decode(raw.as_slice())?.name().to_string());
    }
    assert!(described.iter().any(|name| name == notification::descriptor::FILE_NAME));
    app.stop().await
}
