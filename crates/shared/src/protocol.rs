//! Wire envelope and message classification.
//!
//! Every frame, in both directions, is one JSON object:
//!
//! ```text
//! { "type": string, "payload"?: any, "channel"?: string, "timestamp"?: number }
//! ```
//!
//! Control frames carry their argument in the payload
//! (`SUBSCRIBE { channel }`, `UNSUBSCRIBE { channel }`, `HEARTBEAT { timestamp }`).

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use crate::error::ProtocolError;

pub const TYPE_NOTIFICATION: &str = "notification";
pub const TYPE_HEARTBEAT: &str = "HEARTBEAT";
pub const TYPE_SUBSCRIBE: &str = "SUBSCRIBE";
pub const TYPE_UNSUBSCRIBE: &str = "UNSUBSCRIBE";

/// One frame on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub r#type: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Milliseconds since the Unix epoch. Fractional values are truncated;
    /// anything that is not a usable number reads as absent.
    #[serde(
        default,
        deserialize_with = "lenient_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<i64>,
}

impl Envelope {
    pub fn new(r#type: impl Into<String>, payload: Value) -> Self {
        Self {
            r#type: r#type.into(),
            payload,
            channel: None,
            timestamp: None,
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Stamp the envelope with the current time unless it already has one.
    pub fn stamped(mut self) -> Self {
        if self.timestamp.is_none() {
            self.timestamp = Some(now_millis());
        }
        self
    }

    pub fn subscribe(channel: &str) -> Self {
        Self::new(TYPE_SUBSCRIBE, json!({ "channel": channel })).stamped()
    }

    pub fn unsubscribe(channel: &str) -> Self {
        Self::new(TYPE_UNSUBSCRIBE, json!({ "channel": channel })).stamped()
    }

    pub fn heartbeat(timestamp: i64) -> Self {
        Self::new(TYPE_HEARTBEAT, json!({ "timestamp": timestamp })).with_timestamp(timestamp)
    }

    /// Parse one text frame.
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(frame)?;
        if envelope.r#type.trim().is_empty() {
            return Err(ProtocolError::MissingType);
        }
        Ok(envelope)
    }

    /// Serialize into one text frame.
    pub fn to_frame(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self) -> MessageKind<'_> {
        MessageKind::classify(&self.r#type)
    }

    /// The channel argument of a `SUBSCRIBE`/`UNSUBSCRIBE` frame.
    pub fn control_channel(&self) -> Option<&str> {
        self.payload
            .get("channel")
            .and_then(Value::as_str)
            .or(self.channel.as_deref())
    }
}

/// Known message kinds. Anything else is application-defined and passed
/// through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind<'a> {
    Notification,
    Heartbeat,
    Subscribe,
    Unsubscribe,
    Other(&'a str),
}

impl<'a> MessageKind<'a> {
    pub fn classify(type_name: &'a str) -> Self {
        match type_name {
            TYPE_NOTIFICATION => MessageKind::Notification,
            TYPE_HEARTBEAT => MessageKind::Heartbeat,
            TYPE_SUBSCRIBE => MessageKind::Subscribe,
            TYPE_UNSUBSCRIBE => MessageKind::Unsubscribe,
            other => MessageKind::Other(other),
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(
            self,
            MessageKind::Heartbeat | MessageKind::Subscribe | MessageKind::Unsubscribe
        )
    }
}

fn lenient_millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(millis_from_value))
}

/// Epoch milliseconds from a JSON number, truncating fractions.
pub fn millis_from_value(value: &Value) -> Option<i64> {
    let Value::Number(number) = value else {
        return None;
    };
    if let Some(ms) = number.as_i64() {
        return Some(ms);
    }
    let ms = number.as_f64()?;
    (ms.is_finite() && ms >= i64::MIN as f64 && ms < i64::MAX as f64).then(|| ms.trunc() as i64)
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
