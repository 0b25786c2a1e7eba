//! # Message Model
//!
//! A [`Message`] is an opaque payload plus a string-keyed header map. The
//! bridge never looks into the payload; it only reads the headers listed in
//! [`MessageHeaders`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Header map carried by every message.
pub type HeaderMap = HashMap<String, Value>;

/// Names of the headers the bridge reads and writes.
pub struct MessageHeaders;

impl MessageHeaders {
    /// Prefix shared by all bridge-internal headers.
    pub const PREFIX: &'static str = "bridge_";

    /// Unique message identifier, set on construction.
    pub const ID: &'static str = "bridge_message_id";

    /// Creation time in milliseconds since the Unix epoch.
    pub const TIMESTAMP: &'static str = "bridge_message_timestamp";

    /// Name of the channel a reply should be sent to.
    pub const REPLY_TO: &'static str = "bridge_reply_to";

    /// Returns true if the header name belongs to the bridge.
    #[must_use]
    pub fn is_internal(name: &str) -> bool {
        name.starts_with(Self::PREFIX)
    }
}

/// A message travelling through the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Identifier mirrored in the [`MessageHeaders::ID`] header.
    id: String,

    /// Opaque payload.
    payload: Bytes,

    /// Protocol and bridge headers.
    headers: HeaderMap,
}

impl Message {
    /// Create a message with a fresh id and timestamp header.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self::with_headers(payload, HeaderMap::new())
    }

    /// Create a message from a payload and an existing header map.
    ///
    /// An `ID` header already present in `headers` is kept as the message id.
    #[must_use]
    pub fn with_headers(payload: impl Into<Bytes>, mut headers: HeaderMap) -> Self {
        let id = match headers.get(MessageHeaders::ID) {
            Some(Value::String(id)) => id.clone(),
            _ => {
                let id = Uuid::new_v4().to_string();
                headers.insert(MessageHeaders::ID.to_string(), Value::String(id.clone()));
                id
            }
        };

        headers
            .entry(MessageHeaders::TIMESTAMP.to_string())
            .or_insert_with(|| Value::from(current_timestamp_ms()));

        Self {
            id,
            payload: payload.into(),
            headers,
        }
    }

    /// Builder-style header setter.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Unique id of this message.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The raw payload.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The payload as UTF-8 text, if it is valid UTF-8.
    #[must_use]
    pub fn payload_as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// All headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Look up a single header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&Value> {
        self.headers.get(name)
    }

    /// Header value rendered as a string.
    ///
    /// String values are returned verbatim, any other JSON value uses its
    /// compact JSON rendering.
    #[must_use]
    pub fn header_as_string(&self, name: &str) -> Option<String> {
        self.headers.get(name).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Set a header, replacing any previous value.
    ///
    /// Setting [`MessageHeaders::ID`] to a string also changes the message id.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();

        if name == MessageHeaders::ID {
            match &value {
                Value::String(id) => self.id = id.clone(),
                _ => return,
            }
        }

        self.headers.insert(name, value);
    }

    /// Remove a header. The id header cannot be removed.
    pub fn remove_header(&mut self, name: &str) -> Option<Value> {
        if name == MessageHeaders::ID {
            return None;
        }
        self.headers.remove(name)
    }

    /// Name of the channel replies should go to.
    #[must_use]
    pub fn reply_to(&self) -> Option<&str> {
        self.headers.get(MessageHeaders::REPLY_TO).and_then(Value::as_str)
    }

    /// Set the reply channel name.
    pub fn set_reply_to(&mut self, channel: impl Into<String>) {
        self.headers.insert(
            MessageHeaders::REPLY_TO.to_string(),
            Value::String(channel.into()),
        );
    }

    /// Creation timestamp in milliseconds since the Unix epoch.
    #[must_use]
    pub fn timestamp(&self) -> Option<u64> {
        self.headers.get(MessageHeaders::TIMESTAMP).and_then(Value::as_u64)
    }
}

fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
