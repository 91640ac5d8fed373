//! Audit event data model
//!
//! The wire shape follows the Kubernetes `audit.k8s.io` event, extended with
//! the tenant attribution fields (workspace, devops project, cluster) the
//! platform adds on top.

use std::collections::HashMap;

use apiaudit_common::types::Level;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;
use uuid::Uuid;

/// Processing stage an event was emitted at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Stage {
    RequestReceived,
    ResponseStarted,
    #[default]
    ResponseComplete,
    Panic,
}

/// Verb recorded on an event.
///
/// The resource verbs come from request resolution; `Enable` and `Disable`
/// are synthetic and only ever produced by relabeling user updates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Verb {
    Get,
    List,
    Watch,
    Create,
    Update,
    Patch,
    Delete,
    DeleteCollection,
    Enable,
    Disable,
    /// Non-resource requests carry the lowercased HTTP method
    Other(String),
}

impl Verb {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "get",
            Self::List => "list",
            Self::Watch => "watch",
            Self::Create => "create",
            Self::Update => "update",
            Self::Patch => "patch",
            Self::Delete => "delete",
            Self::DeleteCollection => "deletecollection",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Other(verb) => verb,
        }
    }
}

impl From<&str> for Verb {
    fn from(verb: &str) -> Self {
        match verb {
            "get" => Self::Get,
            "list" => Self::List,
            "watch" => Self::Watch,
            "create" => Self::Create,
            "update" => Self::Update,
            "patch" => Self::Patch,
            "delete" => Self::Delete,
            "deletecollection" => Self::DeleteCollection,
            "enable" => Self::Enable,
            "disable" => Self::Disable,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for Verb {
    fn from(verb: String) -> Self {
        Verb::from(verb.as_str())
    }
}

impl From<Verb> for String {
    fn from(verb: Verb) -> Self {
        verb.as_str().to_string()
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated identity of the caller.
///
/// An authentication layer inserts this into the request extensions; the
/// audit layer only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserInfo {
    pub username: String,
    pub uid: String,
    pub groups: Vec<String>,
    pub extra: HashMap<String, Vec<String>>,
}

impl UserInfo {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }
}

/// Object the request acted on
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ObjectReference {
    pub resource: String,
    pub namespace: String,
    pub name: String,
    pub api_group: String,
    pub api_version: String,
    pub resource_version: String,
    pub subresource: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseStatus {
    pub code: u16,
}

/// Raw request or response payload.
///
/// JSON payloads are embedded verbatim, keeping key order and number
/// formatting. Anything else is written as a (lossy) UTF-8 string so the event
/// itself stays valid JSON. A JSON string payload and a text payload therefore
/// share one wire form, and both read back as the unquoted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObject(pub Bytes);

impl RawObject {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Bytes> for RawObject {
    fn from(raw: Bytes) -> Self {
        Self(raw)
    }
}

impl Serialize for RawObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match serde_json::from_slice::<&RawValue>(&self.0) {
            Ok(raw) => raw.serialize(serializer),
            Err(_) => serializer.serialize_str(&String::from_utf8_lossy(&self.0)),
        }
    }
}

impl<'de> Deserialize<'de> for RawObject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        if raw.get().starts_with('"') {
            let text: String = serde_json::from_str(raw.get()).map_err(serde::de::Error::custom)?;
            return Ok(Self(Bytes::from(text)));
        }
        Ok(Self(Bytes::copy_from_slice(raw.get().as_bytes())))
    }
}

/// One audit record per request/response cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "auditID")]
    pub audit_id: Uuid,
    pub level: Level,
    pub stage: Stage,
    #[serde(rename = "requestURI")]
    pub request_uri: String,
    pub verb: Verb,
    pub user: UserInfo,
    #[serde(rename = "sourceIPs")]
    pub source_ips: Vec<String>,
    pub user_agent: String,
    pub object_ref: ObjectReference,

    #[serde(default)]
    pub workspace: String,
    #[serde(default)]
    pub devops: String,
    #[serde(default)]
    pub cluster: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status: Option<ResponseStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_object: Option<RawObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_object: Option<RawObject>,

    pub request_received_timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_timestamp: Option<DateTime<Utc>>,
}

impl Event {
    /// A fresh event stamped with a new id and the current time.
    pub fn new(level: Level, verb: Verb, object_ref: ObjectReference) -> Self {
        Self {
            audit_id: Uuid::new_v4(),
            level,
            stage: Stage::ResponseComplete,
            request_uri: String::new(),
            verb,
            user: UserInfo::default(),
            source_ips: Vec::new(),
            user_agent: String::new(),
            object_ref,
            workspace: String::new(),
            devops: String::new(),
            cluster: String::new(),
            response_status: None,
            request_object: None,
            response_object: None,
            request_received_timestamp: Utc::now(),
            stage_timestamp: None,
        }
    }
}

/// Batch envelope posted to webhook receivers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventList {
    pub items: Vec<Event>,
}
