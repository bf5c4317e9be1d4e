//! Control-channel message types.
//!
//! Serialized as JSON text frames with an internally tagged `type` field
//! (`register`, `registered`, `request`, `response`, `error`), exactly the
//! shape `server/src/protocol.rs`'s `WsMessage` used, widened to the
//! request/response fields a reverse HTTP tunnel needs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A header value as carried on the wire: either a single string or an
/// array of strings. Array values are passed through verbatim; this type
/// only exists so both shapes deserialize without the sender having to
/// pick one ahead of time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum HeaderValue {
    Single(String),
    Multi(Vec<String>),
}

impl HeaderValue {
    /// Flattens this value into the list of raw strings it represents.
    pub fn values(&self) -> Vec<&str> {
        match self {
            HeaderValue::Single(s) => vec![s.as_str()],
            HeaderValue::Multi(v) => v.iter().map(|s| s.as_str()).collect(),
        }
    }
}

pub type HeaderMap = HashMap<String, HeaderValue>;

/// All messages exchanged over the persistent control channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Sent by the client to request registration, optionally asking for a
    /// specific subdomain and presenting an API key.
    Register {
        #[serde(skip_serializing_if = "Option::is_none")]
        subdomain: Option<String>,
        #[serde(rename = "apiKey", skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
    },

    /// Sent by the server once registration succeeds.
    Registered { subdomain: String, url: String },

    /// A public HTTP request, forwarded by the server to the owning client.
    Request {
        #[serde(rename = "requestId")]
        request_id: String,
        method: String,
        path: String,
        headers: HeaderMap,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },

    /// The client's answer to a [`ControlMessage::Request`].
    Response {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "statusCode")]
        status_code: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<HeaderMap>,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },

    /// A fatal or informational error from either side.
    Error { message: String },

    /// Any `type` value not recognized above. Logged and ignored by the
    /// receiver; never causes the channel to close.
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    /// The wire `type` discriminant, mostly useful for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Register { .. } => "register",
            ControlMessage::Registered { .. } => "registered",
            ControlMessage::Request { .. } => "request",
            ControlMessage::Response { .. } => "response",
            ControlMessage::Error { .. } => "error",
            ControlMessage::Unknown => "unknown",
        }
    }
}
