//! Notification wire payload, materialized model and presentation category.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::protocol::{millis_from_value, Envelope};

/// Fallback `type` for notifications that do not name one.
pub const DEFAULT_NOTIFICATION_TYPE: &str = "info";

/// Payload of a `notification` envelope as a publisher sends it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

/// A notification held by the notification center.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    #[serde(default)]
    pub data: Value,
    /// Local wall-clock receipt time.
    #[serde(skip, default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl Notification {
    /// Build a notification from an inbound payload.
    ///
    /// Never fails: missing ids are generated, missing or unparseable
    /// timestamps fall back to `received_at`, a bare string payload becomes
    /// the message body.
    pub fn from_payload(payload: &Value, received_at: DateTime<Utc>) -> Self {
        Self::build(payload, received_at, received_at)
    }

    /// Like [`from_payload`](Self::from_payload), but a payload without a
    /// usable timestamp takes the envelope's before falling back to
    /// `received_at`.
    pub fn from_envelope(envelope: &Envelope, received_at: DateTime<Utc>) -> Self {
        let sent_at = envelope
            .timestamp
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or(received_at);
        Self::build(&envelope.payload, sent_at, received_at)
    }

    fn build(payload: &Value, fallback: DateTime<Utc>, received_at: DateTime<Utc>) -> Self {
        if let Some(text) = payload.as_str() {
            return Self {
                id: Uuid::new_v4().to_string(),
                kind: DEFAULT_NOTIFICATION_TYPE.to_string(),
                title: String::new(),
                message: text.to_string(),
                timestamp: fallback,
                read: false,
                data: Value::Null,
                received_at,
            };
        }

        let id = match payload.get("id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        let kind = text_field(payload, "type")
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_NOTIFICATION_TYPE.to_string());

        Self {
            id,
            kind,
            title: text_field(payload, "title").unwrap_or_default(),
            message: text_field(payload, "message").unwrap_or_default(),
            timestamp: payload
                .get("timestamp")
                .and_then(parse_timestamp)
                .unwrap_or(fallback),
            read: false,
            data: payload.get("data").cloned().unwrap_or(Value::Null),
            received_at,
        }
    }

    pub fn category(&self) -> ToastCategory {
        ToastCategory::from_type(&self.kind)
    }

    /// Link target carried in `data.url`, if any.
    pub fn url(&self) -> Option<&str> {
        self.data.get("url").and_then(Value::as_str)
    }
}

fn text_field(payload: &Value, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Accepts RFC 3339 strings and epoch milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(_) => {
            millis_from_value(value).and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        }
        _ => None,
    }
}

/// Presentation category of a toast, derived from a notification `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToastCategory {
    Success,
    Error,
    Warning,
    Info,
    Email,
    Invoice,
    Payment,
    Report,
    Client,
    Automation,
}

impl ToastCategory {
    /// Map a notification type to its category.
    ///
    /// Case-insensitive. Domain types match on their leading segment, so
    /// `invoice:paid`, `invoice_overdue` and `Invoice` all map to `Invoice`.
    /// Unrecognized types are `Info`.
    pub fn from_type(type_name: &str) -> Self {
        let lowered = type_name.trim().to_ascii_lowercase();
        let head = lowered
            .split(|c: char| c == ':' || c == '_' || c == '.' || c == '-' || c == '/')
            .next()
            .unwrap_or("");

        match head {
            "success" | "succeeded" | "completed" | "done" => ToastCategory::Success,
            "error" | "failure" | "failed" | "critical" => ToastCategory::Error,
            "warning" | "warn" | "alert" => ToastCategory::Warning,
            "email" | "mail" | "campaign" => ToastCategory::Email,
            "invoice" | "invoices" => ToastCategory::Invoice,
            "payment" | "payments" => ToastCategory::Payment,
            "report" | "reports" | "analytics" => ToastCategory::Report,
            "client" | "clients" | "crm" => ToastCategory::Client,
            "automation" | "rule" | "rules" | "workflow" => ToastCategory::Automation,
            _ => ToastCategory::Info,
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            ToastCategory::Success => "check-circle",
            ToastCategory::Error => "x-circle",
            ToastCategory::Warning => "alert-triangle",
            ToastCategory::Info => "info",
            ToastCategory::Email => "mail",
            ToastCategory::Invoice => "file-text",
            ToastCategory::Payment => "credit-card",
            ToastCategory::Report => "bar-chart",
            ToastCategory::Client => "users",
            ToastCategory::Automation => "zap",
        }
    }
}
