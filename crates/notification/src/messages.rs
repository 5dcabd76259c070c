//! Wire messages of `notification.v1`.
//!
//! Written out with `prost` derives instead of generated from a `.proto`, so
//! the crate builds without `protoc`. Field tags are part of the wire contract.
//! The serde derives give the JSON shape used by the REST gateway.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// An application installation and the push token it currently holds.
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppInstance {
    #[prost(string, tag = "1")]
    pub instance_id: String,
    #[prost(string, tag = "2")]
    pub token: String,
    #[prost(map = "string, string", tag = "3")]
    pub labels: HashMap<String, String>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoveTokenRequest {
    #[prost(string, tag = "1")]
    pub instance_id: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoveInstanceRequest {
    #[prost(string, tag = "1")]
    pub instance_id: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Notification {
    #[prost(string, tag = "1")]
    pub title: String,
    #[prost(string, tag = "2")]
    pub body: String,
    #[prost(map = "string, string", tag = "3")]
    pub data: HashMap<String, String>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendRequest {
    #[prost(string, tag = "1")]
    pub instance_id: String,
    #[prost(message, optional, tag = "2")]
    pub notification: Option<Notification>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendAllRequest {
    #[prost(message, repeated, tag = "1")]
    pub messages: Vec<SendRequest>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendMulticastRequest {
    #[prost(string, repeated, tag = "1")]
    pub instance_ids: Vec<String>,
    #[prost(message, optional, tag = "2")]
    pub notification: Option<Notification>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListNotificationsRequest {
    #[prost(string, tag = "1")]
    pub instance_id: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationList {
    #[prost(message, repeated, tag = "1")]
    pub notifications: Vec<Notification>,
}

/// Message templates, stored as documents in the configs collection. The
/// service concatenates the `messages` of every document at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationConfig {
    pub messages: Vec<MessageTemplate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageTemplate {
    pub name: String,
    pub title: String,
    pub body: String,
}

const MAX_ID_LEN: usize = 256;

/// Ids become document path segments, so they must be non-empty and free of `/`.
pub(crate) fn validate_instance_id(field: &str, id: &str) -> Result<(), tonic::Status> {
    if id.is_empty() {
        return Err(tonic::Status::invalid_argument(format!("{field} must not be empty")));
    }
    if id.len() > MAX_ID_LEN || id.contains('/') {
        return Err(tonic::Status::invalid_argument(format!("{field} is not a valid id")));
    }
    Ok(())
}

impl AppInstance {
    pub fn validate(&self) -> Result<(), tonic::Status> {
        validate_instance_id("instance_id", &self.instance_id)
    }
}

impl RemoveTokenRequest {
    pub fn validate(&self) -> Result<(), tonic::Status> {
        validate_instance_id("instance_id", &self.instance_id)
    }
}

impl RemoveInstanceRequest {
    pub fn validate(&self) -> Result<(), tonic::Status> {
        validate_instance_id("instance_id", &self.instance_id)
    }
}

impl ListNotificationsRequest {
    pub fn validate(&self) -> Result<(), tonic::Status> {
        validate_instance_id("instance_id", &self.instance_id)
    }
}

impl SendRequest {
    pub fn validate(&self) -> Result<(), tonic::Status> {
        validate_instance_id("instance_id", &self.instance_id)?;
        if self.notification.is_none() {
            return Err(tonic::Status::invalid_argument("notification is required"));
        }
        Ok(())
    }
}

impl SendAllRequest {
    pub fn validate(&self) -> Result<(), tonic::Status> {
        if self.messages.is_empty() {
            return Err(tonic::Status::invalid_argument("messages must not be empty"));
        }
        self.messages.iter().try_for_each(SendRequest::validate)
    }
}

impl SendMulticastRequest {
    pub fn validate(&self) -> Result<(), tonic::Status> {
        if self.instance_ids.is_empty() {
            return Err(tonic::Status::invalid_argument("instance_ids must not be empty"));
        }
        for id in &self.instance_ids {
            validate_instance_id("instance_ids", id)?;
        }
        if self.notification.is_none() {
            return Err(tonic::Status::invalid_argument("notification is required"));
        }
        Ok(())
    }
}
