//! Document storage used by the notification service.
//!
//! Documents are JSON objects addressed by `collection/id`. The service only
//! needs the handful of operations below; any backend offering them can be
//! injected.

pub mod json_document_store;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::errors::StoreError;

pub use json_document_store::JsonDocumentStore;

pub type Document = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Merge fields into the existing document, creating it if missing.
    Merge,
    /// Replace the whole document.
    Overwrite,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError>;

    async fn set(&self, path: &str, doc: Document, mode: WriteMode) -> Result<(), StoreError>;

    /// Set a single top-level field. Fails with `NotFound` if the document
    /// does not exist.
    async fn update(&self, path: &str, field: &str, value: Value) -> Result<(), StoreError>;

    /// Delete a document; deleting a missing document is not an error.
    async fn delete(&self, path: &str) -> Result<bool, StoreError>;

    /// Documents directly under `collection`, ordered by id.
    async fn list(&self, collection: &str) -> Result<Vec<(String, Document)>, StoreError>;
}

/// Split `collection/id`, rejecting empty segments.
pub fn split_path(path: &str) -> Result<(&str, &str), StoreError> {
    match path.rsplit_once('/') {
        Some((collection, id)) if !collection.is_empty() && !id.is_empty() => Ok((collection, id)),
        _ => Err(StoreError::InvalidPath(path.to_string())),
    }
}

/// Deep-merge `patch` into `target`: nested objects merge key by key, every
/// other value replaces what was there.
pub fn merge_into(target: &mut Document, patch: Document) {
    for (key, value) in patch {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => merge_into(existing, incoming),
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}
