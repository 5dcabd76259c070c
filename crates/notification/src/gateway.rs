//! REST routes for the notification API. Every handler re-encodes the JSON
//! body as protobuf and calls the gRPC backend over the loopback channel.

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method};
use axum::Json;
use serde_json::{json, Value};
use server::{DialOptions, GatewayClient, GatewayError, GatewayMux, GatewayRegistrable, RegistrationError};

use crate::grpc::paths;
use crate::messages::{
    AppInstance, ListNotificationsRequest, NotificationList, RemoveInstanceRequest,
    RemoveTokenRequest, SendAllRequest, SendMulticastRequest, SendRequest,
};
use crate::service::NotificationService;

type Empty = Result<Json<Value>, GatewayError>;

fn empty() -> Json<Value> {
    Json(json!({}))
}

async fn put_instance(
    State(client): State<GatewayClient>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(mut body): Json<AppInstance>,
) -> Empty {
    // 路径中的 id 优先于请求体
    body.instance_id = id;
    client.unary::<_, ()>(paths::PUT_INSTANCE, body, &headers).await?;
    Ok(empty())
}

async fn create_instance(
    State(client): State<GatewayClient>,
    headers: HeaderMap,
    Json(body): Json<AppInstance>,
) -> Empty {
    client.unary::<_, ()>(paths::PUT_INSTANCE, body, &headers).await?;
    Ok(empty())
}

async fn remove_token(
    State(client): State<GatewayClient>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Empty {
    let req = RemoveTokenRequest { instance_id: id };
    client.unary::<_, ()>(paths::REMOVE_TOKEN, req, &headers).await?;
    Ok(empty())
}

async fn remove_instance(
    State(client): State<GatewayClient>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Empty {
    let req = RemoveInstanceRequest { instance_id: id };
    client.unary::<_, ()>(paths::REMOVE_INSTANCE, req, &headers).await?;
    Ok(empty())
}

async fn send(
    State(client): State<GatewayClient>,
    headers: HeaderMap,
    Json(body): Json<SendRequest>,
) -> Empty {
    client.unary::<_, ()>(paths::SEND, body, &headers).await?;
    Ok(empty())
}

async fn send_all(
    State(client): State<GatewayClient>,
    headers: HeaderMap,
    Json(body): Json<SendAllRequest>,
) -> Empty {
    client.unary::<_, ()>(paths::SEND_ALL, body, &headers).await?;
    Ok(empty())
}

async fn send_multicast(
    State(client): State<GatewayClient>,
    headers: HeaderMap,
    Json(body): Json<SendMulticastRequest>,
) -> Empty {
    client.unary::<_, ()>(paths::SEND_MULTICAST, body, &headers).await?;
    Ok(empty())
}

async fn list_notifications(
    State(client): State<GatewayClient>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<NotificationList>, GatewayError> {
    let req = ListNotificationsRequest { instance_id: id };
    let list = client.unary(paths::LIST_NOTIFICATIONS, req, &headers).await?;
    Ok(Json(list))
}

#[async_trait]
impl GatewayRegistrable for NotificationService {
    async fn register_gateway(
        &self,
        mux: &mut GatewayMux,
        bind: &str,
        opts: &DialOptions,
    ) -> Result<(), RegistrationError> {
        let client = GatewayClient::dial(bind, opts)?;
        mux.handle(Method::PUT, "/v1/instances/:id", put_instance, client.clone())?
            .handle(Method::POST, "/v1/instances", create_instance, client.clone())?
            .handle(Method::DELETE, "/v1/instances/:id/token", remove_token, client.clone())?
            .handle(Method::DELETE, "/v1/instances/:id", remove_instance, client.clone())?
            .handle(Method::GET, "/v1/instances/:id/notifications", list_notifications, client.clone())?
            .handle(Method::POST, "/v1/send", send, client.clone())?
            .handle(Method::POST, "/v1/send-all", send_all, client.clone())?
            .handle(Method::POST, "/v1/send-multicast", send_multicast, client)?;
        Ok(())
    }
}
