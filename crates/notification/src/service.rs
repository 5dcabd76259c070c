use std::sync::Arc;

use serde_json::Value;
use server::{GatewayRegistrable, GrpcRegistrable};
use tonic::Status;
use tracing::{debug, info};

use crate::errors::StoreError;
use crate::messages::{
    AppInstance, ListNotificationsRequest, NotificationConfig, NotificationList,
    RemoveInstanceRequest, RemoveTokenRequest, SendAllRequest, SendMulticastRequest, SendRequest,
};
use crate::storage::{Document, DocumentStore, WriteMode};

pub const INSTANCES_COLLECTION: &str = "fcm-companion-instances";
pub const CONFIGS_COLLECTION: &str = "fcm-companion-configs";

/// Notification API business logic over an injected document store.
///
/// Cloning yields another handle to the same service; the state behind it is
/// shared, never duplicated.
#[derive(Clone)]
pub struct NotificationService {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn DocumentStore>,
    collection_prefix: String,
    config: NotificationConfig,
}

impl NotificationService {
    /// Build the service and load its message configuration from the store.
    pub async fn new(
        store: Arc<dyn DocumentStore>,
        collection_prefix: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let collection_prefix = collection_prefix.into();
        let config = fetch_config(store.as_ref(), &collection_prefix).await?;
        info!(
            service = "notification",
            event = "config_loaded",
            messages = config.messages.len(),
            prefix = %collection_prefix,
            "notification config loaded"
        );
        Ok(Self { inner: Arc::new(Inner { store, collection_prefix, config }) })
    }

    pub fn config(&self) -> &NotificationConfig {
        &self.inner.config
    }

    /// Whether both handles point at the same service.
    pub fn same_service(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn instance_path(&self, instance_id: &str) -> String {
        format!("{}{}/{}", self.inner.collection_prefix, INSTANCES_COLLECTION, instance_id)
    }

    /// Store an instance. Without labels the fields are merged into any
    /// existing document; with labels the whole document is replaced so stale
    /// labels disappear.
    pub async fn put_instance(&self, instance: AppInstance) -> Result<(), Status> {
        instance.validate()?;
        let path = self.instance_path(&instance.instance_id);
        let mode = if instance.labels.is_empty() { WriteMode::Merge } else { WriteMode::Overwrite };
        let doc = to_document(&instance)?;
        self.inner.store.set(&path, doc, mode).await?;
        debug!(%path, ?mode, "instance stored");
        Ok(())
    }

    /// Clear the token of an instance, keeping the rest of the document.
    pub async fn remove_token(&self, req: RemoveTokenRequest) -> Result<(), Status> {
        req.validate()?;
        let path = self.instance_path(&req.instance_id);
        self.inner.store.update(&path, "token", Value::String(String::new())).await?;
        debug!(%path, "instance token cleared");
        Ok(())
    }

    pub async fn remove_instance(&self, req: RemoveInstanceRequest) -> Result<(), Status> {
        req.validate()?;
        let path = self.instance_path(&req.instance_id);
        let existed = self.inner.store.delete(&path).await?;
        debug!(%path, existed, "instance removed");
        Ok(())
    }

    pub async fn send(&self, req: SendRequest) -> Result<(), Status> {
        req.validate()?;
        Err(Status::unimplemented("Send is not implemented"))
    }

    pub async fn send_all(&self, req: SendAllRequest) -> Result<(), Status> {
        req.validate()?;
        Err(Status::unimplemented("SendAll is not implemented"))
    }

    pub async fn send_multicast(&self, req: SendMulticastRequest) -> Result<(), Status> {
        req.validate()?;
        Err(Status::unimplemented("SendMulticast is not implemented"))
    }

    pub async fn list_notifications(
        &self,
        req: ListNotificationsRequest,
    ) -> Result<NotificationList, Status> {
        req.validate()?;
        Err(Status::unimplemented("ListNotifications is not implemented"))
    }
}

impl server::Service for NotificationService {
    fn name(&self) -> &str {
        "notification"
    }

    fn as_grpc(&self) -> Option<&dyn GrpcRegistrable> {
        Some(self)
    }

    fn as_gateway(&self) -> Option<&dyn GatewayRegistrable> {
        Some(self)
    }
}

fn to_document<T: serde::Serialize>(value: &T) -> Result<Document, Status> {
    match serde_json::to_value(value).map_err(StoreError::from)? {
        Value::Object(doc) => Ok(doc),
        _ => Err(Status::internal("message did not serialize to an object")),
    }
}

/// Concatenate the `messages` of every document in the configs collection.
async fn fetch_config(
    store: &dyn DocumentStore,
    collection_prefix: &str,
) -> Result<NotificationConfig, StoreError> {
    let collection = format!("{collection_prefix}{CONFIGS_COLLECTION}");
    let mut config = NotificationConfig::default();
    for (_, doc) in store.list(&collection).await? {
        let part: NotificationConfig = serde_json::from_value(Value::Object(doc))?;
        config.messages.extend(part.messages);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Notification;
    use crate::storage::JsonDocumentStore;
    use serde_json::json;
    use std::collections::HashMap;

    async fn service() -> (NotificationService, JsonDocumentStore) {
        let store = JsonDocumentStore::in_memory();
        let svc = NotificationService::new(Arc::new(store.clone()), "test-").await.unwrap();
        (svc, store)
    }

    fn instance(id: &str, token: &str, labels: &[(&str, &str)]) -> AppInstance {
        AppInstance {
            instance_id: id.into(),
            token: token.into(),
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<HashMap<_, _>>(),
        }
    }

    #[tokio::test]
    async fn config_messages_are_concatenated_across_documents() {
        let store = JsonDocumentStore::in_memory();
        for (id, name) in [("a", "welcome"), ("b", "reminder")] {
            let doc = json!({"messages": [{"name": name, "title": "t", "body": "b"}]});
            store
                .set(
                    &format!("p-{CONFIGS_COLLECTION}/{id}"),
                    doc.as_object().cloned().unwrap(),
                    WriteMode::Overwrite,
                )
                .await
                .unwrap();
        }
        let svc = NotificationService::new(Arc::new(store), "p-").await.unwrap();
        let names: Vec<_> = svc.config().messages.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["welcome", "reminder"]);
    }

    #[tokio::test]
    async fn put_without_labels_merges() {
        let (svc, store) = service().await;
        svc.put_instance(instance("i-1", "t1", &[("os", "ios")])).await.unwrap();
        svc.put_instance(instance("i-1", "t2", &[])).await.unwrap();
        let doc = store.get(&svc.instance_path("i-1")).await.unwrap().unwrap();
        assert_eq!(doc["token"], "t2");
        assert_eq!(doc["labels"]["os"], "ios");
    }

    #[tokio::test]
    async fn put_with_labels_overwrites() {
        let (svc, store) = service().await;
        svc.put_instance(instance("i-1", "t1", &[("os", "ios")])).await.unwrap();
        svc.put_instance(instance("i-1", "t1", &[("lang", "en")])).await.unwrap();
        let doc = store.get(&svc.instance_path("i-1")).await.unwrap().unwrap();
        assert_eq!(doc["labels"], json!({"lang": "en"}));
    }

    #[tokio::test]
    async fn remove_token_keeps_document() {
        let (svc, store) = service().await;
        svc.put_instance(instance("i-1", "t1", &[("os", "ios")])).await.unwrap();
        svc.remove_token(RemoveTokenRequest { instance_id: "i-1".into() }).await.unwrap();
        let doc = store.get(&svc.instance_path("i-1")).await.unwrap().unwrap();
        assert_eq!(doc["token"], "");
        assert_eq!(doc["labels"]["os"], "ios");

        let err = svc.remove_token(RemoveTokenRequest { instance_id: "nope".into() }).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn remove_instance_deletes_document() {
        let (svc, store) = service().await;
        svc.put_instance(instance("i-1", "t1", &[])).await.unwrap();
        svc.remove_instance(RemoveInstanceRequest { instance_id: "i-1".into() }).await.unwrap();
        assert!(store.get(&svc.instance_path("i-1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn send_validates_before_reporting_unimplemented() {
        let (svc, _) = service().await;
        let bad = svc.send(SendRequest { instance_id: "i-1".into(), notification: None }).await;
        assert_eq!(bad.unwrap_err().code(), tonic::Code::InvalidArgument);

        let good = SendRequest { instance_id: "i-1".into(), notification: Some(Notification::default()) };
        assert_eq!(svc.send(good).await.unwrap_err().code(), tonic::Code::Unimplemented);
    }

    #[tokio::test]
    async fn invalid_instance_is_rejected() {
        let (svc, _) = service().await;
        let err = svc.put_instance(instance("", "t", &[])).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }
}
