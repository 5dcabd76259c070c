use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use tokio::{fs, sync::RwLock};
use tracing::{debug, warn};

use super::{merge_into, split_path, Document, DocumentStore, WriteMode};
use crate::errors::StoreError;

/// JSON document store kept in memory, optionally persisted to one file.
///
/// Keys are full document paths (`collection/id`). With a file path every
/// write rewrites the file; the in-memory variant is meant for tests and
/// local runs.
#[derive(Clone)]
pub struct JsonDocumentStore {
    inner: Arc<RwLock<BTreeMap<String, Document>>>,
    file_path: Option<PathBuf>,
}

impl JsonDocumentStore {
    pub fn in_memory() -> Self {
        Self { inner: Arc::new(RwLock::new(BTreeMap::new())), file_path: None }
    }

    /// Load the store from `path`, creating the file with no documents if missing.
    pub async fn open<P: Into<PathBuf>>(path: P) -> Result<Self, StoreError> {
        let file_path = path.into();
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await.ok();
        }

        let docs: BTreeMap<String, Document> = match fs::read(&file_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let empty = BTreeMap::new();
                fs::write(&file_path, serde_json::to_vec(&empty)?).await?;
                empty
            }
            Err(e) => return Err(e.into()),
        };
        debug!(path = %file_path.display(), documents = docs.len(), "document store opened");

        Ok(Self { inner: Arc::new(RwLock::new(docs)), file_path: Some(file_path) })
    }

    async fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.file_path else {
            return Ok(());
        };
        let docs = self.inner.read().await;
        let data = serde_json::to_vec(&*docs)?;
        drop(docs);
        fs::write(path, data).await.map_err(|e| {
            warn!(path = %path.display(), error = %e, "failed to persist document store");
            StoreError::from(e)
        })
    }
}

#[async_trait]
impl DocumentStore for JsonDocumentStore {
    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        split_path(path)?;
        Ok(self.inner.read().await.get(path).cloned())
    }

    async fn set(&self, path: &str, doc: Document, mode: WriteMode) -> Result<(), StoreError> {
        split_path(path)?;
        let mut docs = self.inner.write().await;
        match docs.get_mut(path) {
            Some(existing) if mode == WriteMode::Merge => merge_into(existing, doc),
            _ => {
                docs.insert(path.to_string(), doc);
            }
        }
        drop(docs);
        self.save().await
    }

    async fn update(&self, path: &str, field: &str, value: Value) -> Result<(), StoreError> {
        split_path(path)?;
        let mut docs = self.inner.write().await;
        let doc = docs.get_mut(path).ok_or_else(|| StoreError::not_found(path))?;
        doc.insert(field.to_string(), value);
        drop(docs);
        self.save().await
    }

    async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        split_path(path)?;
        let mut docs = self.inner.write().await;
        let existed = docs.remove(path).is_some();
        drop(docs);
        if existed {
            self.save().await?;
        }
        Ok(existed)
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Document)>, StoreError> {
        let prefix = format!("{}/", collection.trim_end_matches('/'));
        let docs = self.inner.read().await;
        Ok(docs
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, doc)| {
                let id = &key[prefix.len()..];
                (!id.contains('/')).then(|| (id.to_string(), doc.clone()))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        v.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn json_document_store_crud_persists() -> Result<(), anyhow::Error> {
        let tmp = std::env::temp_dir().join(format!("json_document_store_{}.json", uuid::Uuid::new_v4()));
        let store = JsonDocumentStore::open(&tmp).await?;

        assert!(store.list("instances").await?.is_empty());

        store.set("instances/a", doc(json!({"token": "1"})), WriteMode::Overwrite).await?;
        store.set("instances/b", doc(json!({"token": "2"})), WriteMode::Overwrite).await?;
        store.set("configs/x", doc(json!({"messages": []})), WriteMode::Overwrite).await?;
        store.update("instances/a", "token", json!("")).await?;
        assert_eq!(store.get("instances/a").await?.unwrap()["token"], "");

        assert!(store.delete("instances/b").await?);
        assert!(!store.delete("instances/b").await?);

        let reloaded = JsonDocumentStore::open(&tmp).await?;
        let ids: Vec<_> = reloaded.list("instances").await?.into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a"]);

        let _ = tokio::fs::remove_file(&tmp).await;
        Ok(())
    }

    #[tokio::test]
    async fn merge_creates_then_merges() -> Result<(), anyhow::Error> {
        let store = JsonDocumentStore::in_memory();
        store.set("i/1", doc(json!({"token": "t", "labels": {"os": "ios"}})), WriteMode::Merge).await?;
        store.set("i/1", doc(json!({"token": "u"})), WriteMode::Merge).await?;
        assert_eq!(
            Value::Object(store.get("i/1").await?.unwrap()),
            json!({"token": "u", "labels": {"os": "ios"}})
        );
        store.set("i/1", doc(json!({"token": "v"})), WriteMode::Overwrite).await?;
        assert_eq!(Value::Object(store.get("i/1").await?.unwrap()), json!({"token": "v"}));
        Ok(())
    }

    #[tokio::test]
    async fn update_of_missing_document_is_not_found() {
        let store = JsonDocumentStore::in_memory();
        let err = store.update("i/missing", "token", json!("")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_skips_nested_and_sibling_collections() -> Result<(), anyhow::Error> {
        let store = JsonDocumentStore::in_memory();
        store.set("col/a", Document::new(), WriteMode::Overwrite).await?;
        store.set("col/a/sub/b", Document::new(), WriteMode::Overwrite).await?;
        store.set("col2/c", Document::new(), WriteMode::Overwrite).await?;
        let ids: Vec<_> = store.list("col").await?.into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a"]);
        Ok(())
    }
}
