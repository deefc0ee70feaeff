//! Publish-bus boundary.
//!
//! [`Publisher`] is the seam between the discovery pipeline and the MQTT
//! client. The helpers in this module build topics and flatten readings into
//! one message per field; a failed publish is logged and never stops the
//! messages after it.

pub mod mqtt;

use crate::reading::{FieldValue, Reading};
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Root of every topic.
pub const TOPIC_PREFIX: &str = "/ble/advertise";

/// Segment that separates manufacturer data from service data topics.
pub const MANUFACTURER_SEGMENT: &str = "manufacturer";

/// Leaf segment for service payloads that have no decoder.
pub const RAW_SEGMENT: &str = "raw";

/// Errors from the publish bus.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Invalid broker URL: {0}")]
    InvalidUrl(String),
    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("MQTT client error: {0}")]
    Client(String),
    #[error("MQTT connection error: {0}")]
    Connection(String),
}

/// Outbound message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Sent as-is.
    Text(String),
    /// Sent as-is.
    Bytes(Vec<u8>),
    /// Serialized to JSON before sending.
    Json(Value),
}

impl Message {
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Message::Json)
    }

    /// Wire payload.
    pub fn into_payload(self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Message::Text(text) => Ok(text.into_bytes()),
            Message::Bytes(bytes) => Ok(bytes),
            Message::Json(value) => serde_json::to_vec(&value),
        }
    }
}

impl From<&FieldValue> for Message {
    fn from(value: &FieldValue) -> Self {
        Message::Text(value.to_string())
    }
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => Message::Text(text),
            other => Message::Json(other),
        }
    }
}

/// Sink for outbound messages. One instance is shared by every in-flight
/// discovery event.
pub trait Publisher: Send + Sync {
    /// Publish one message.
    fn send(&self, topic: String, message: Message) -> BoxFuture<'_, Result<(), PublishError>>;

    /// Close the connection. Calling it again is a no-op.
    fn disconnect(&self) -> BoxFuture<'_, Result<(), PublishError>>;
}

/// `/ble/advertise/{device}`
pub fn device_topic(device_id: &str) -> String {
    format!("{TOPIC_PREFIX}/{device_id}")
}

/// `/ble/advertise/{device}/manufacturer/{company}`
pub fn manufacturer_topic(device_id: &str, company_id: &str) -> String {
    format!("{TOPIC_PREFIX}/{device_id}/{MANUFACTURER_SEGMENT}/{company_id}")
}

/// `/ble/advertise/{device}/{service}`
pub fn service_topic(device_id: &str, service_id: &str) -> String {
    format!("{TOPIC_PREFIX}/{device_id}/{service_id}")
}

/// `{parent}/{field}`
pub fn field_topic(parent: &str, field: &str) -> String {
    format!("{parent}/{field}")
}

/// Publish a single message, logging instead of returning failures.
pub async fn publish(publisher: &dyn Publisher, topic: String, message: Message) -> bool {
    tracing::trace!(topic = %topic, "Publishing");
    match publisher.send(topic.clone(), message).await {
        Ok(()) => true,
        Err(error) => {
            tracing::warn!(topic = %topic, error = %error, "Publish failed");
            false
        }
    }
}

/// Publish every field of a reading under `parent`, in reading order.
pub async fn publish_reading(publisher: &dyn Publisher, parent: &str, reading: &Reading) {
    for (name, value) in reading.iter() {
        publish(publisher, field_topic(parent, name), Message::from(value)).await;
    }
}

/// Publish every entry of a JSON object under `parent`, in document order.
/// Keys that are not a single topic level are skipped.
pub async fn publish_object(publisher: &dyn Publisher, parent: &str, fields: Map<String, Value>) {
    for (name, value) in fields {
        if !is_topic_segment(&name) {
            tracing::warn!(topic = %parent, key = %name, "Skipping field with invalid topic segment");
            continue;
        }
        publish(publisher, field_topic(parent, &name), Message::from(value)).await;
    }
}

/// Non-empty, without level separators or wildcards.
fn is_topic_segment(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '+', '#'])
}
