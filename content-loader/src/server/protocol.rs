//! Command and event vocabulary.
//!
//! These types are the wire contract between a loader and the content
//! server. The in-process backend passes them by value; the worker backend
//! serializes them to JSON. Both see exactly the same set of messages.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::error::ServerError;

/// How resource bytes are handed back to the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Blob,
    Json,
    Text,
    Document,
    #[default]
    #[serde(alias = "arraybuffer")]
    Bytes,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Blob => "blob",
            ResponseType::Json => "json",
            ResponseType::Text => "text",
            ResponseType::Document => "document",
            ResponseType::Bytes => "bytes",
        }
    }
}

/// Arguments of [`Command::GetResource`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetResource {
    /// Client-chosen identifier echoed on every event for this request.
    pub request_id: String,
    pub cache_name: String,
    /// Origin to use if registered; otherwise the least-loaded origin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_origin: Option<String>,
    /// Path relative to the origin URL; also the cache key.
    pub resource_name: String,
    #[serde(default)]
    pub response_type: ResponseType,
    /// When `false` the cache is not consulted (but is still written).
    #[serde(default = "default_return_cached")]
    pub return_cached: bool,
}

fn default_return_cached() -> bool {
    true
}

impl GetResource {
    pub fn new(
        request_id: impl Into<String>,
        cache_name: impl Into<String>,
        resource_name: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            cache_name: cache_name.into(),
            preferred_origin: None,
            resource_name: resource_name.into(),
            response_type: ResponseType::Bytes,
            return_cached: true,
        }
    }

    pub fn with_response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    pub fn with_return_cached(mut self, return_cached: bool) -> Self {
        self.return_cached = return_cached;
        self
    }

    pub fn with_preferred_origin(mut self, origin: impl Into<String>) -> Self {
        self.preferred_origin = Some(origin.into());
        self
    }
}

/// Client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Command {
    AddOrigin { url: String },
    RemoveOrigin { url: String },
    OpenCache { name: String },
    DeleteCache { name: String },
    GetResource(GetResource),
}

/// Decoded resource payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ResourceData {
    Bytes(Bytes),
    Text(String),
    Json(serde_json::Value),
}

impl ResourceData {
    /// Interpret raw bytes according to `response_type`.
    ///
    /// `blob` and `bytes` pass the buffer through; `text` and `document`
    /// require UTF-8; `json` parses the body.
    pub fn decode(
        resource_name: &str,
        response_type: ResponseType,
        data: Bytes,
    ) -> Result<Self, ServerError> {
        match response_type {
            ResponseType::Blob | ResponseType::Bytes => Ok(ResourceData::Bytes(data)),
            ResponseType::Text | ResponseType::Document => String::from_utf8(data.to_vec())
                .map(ResourceData::Text)
                .map_err(|e| ServerError::Decode {
                    resource: resource_name.to_string(),
                    message: e.to_string(),
                }),
            ResponseType::Json => serde_json::from_slice(&data)
                .map(ResourceData::Json)
                .map_err(|e| ServerError::Decode {
                    resource: resource_name.to_string(),
                    message: e.to_string(),
                }),
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            ResourceData::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResourceData::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ResourceData::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Event {
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    CacheReady {
        name: String,
    },
    Progress {
        request_id: String,
        percent: u8,
    },
    ResourceData {
        request_id: String,
        resource_url: String,
        resource_name: String,
        data: ResourceData,
        response_type: ResponseType,
    },
}

impl Event {
    /// Request the event belongs to, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Event::Error { request_id, .. } => request_id.as_deref(),
            Event::CacheReady { .. } => None,
            Event::Progress { request_id, .. } | Event::ResourceData { request_id, .. } => {
                Some(request_id)
            }
        }
    }
}
