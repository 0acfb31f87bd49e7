//! Latest-status feeds for long-running feature work (report generation,
//! mailbox sync, ...).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tally_shared::Envelope;
use tokio::sync::watch;

use crate::client::{RealtimeClient, Subscription};
use crate::event::Callback;
use crate::registry::Topic;

/// Most recent update for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub key: String,
    pub status: Option<String>,
    pub payload: Value,
    pub updated_at: DateTime<Utc>,
}

impl StatusUpdate {
    /// Read `key_field` out of the payload. Numbers are accepted as keys.
    pub fn from_payload(payload: &Value, key_field: &str, updated_at: DateTime<Utc>) -> Option<Self> {
        let key = match payload.get(key_field)? {
            Value::String(s) if !s.is_empty() => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        Some(Self {
            key,
            status: payload
                .get("status")
                .and_then(Value::as_str)
                .map(str::to_string),
            payload: payload.clone(),
            updated_at,
        })
    }
}

/// Latest update per key.
pub type StatusMap = HashMap<String, StatusUpdate>;

/// Follows one message type and keeps the latest update per key.
///
/// ```rust,no_run
/// # use tally_client::{RealtimeClient, StatusFeed};
/// # async fn example(client: RealtimeClient) {
/// let reports = StatusFeed::attach(&client, "report:status_update", "reportId");
/// let mut updates = reports.watch();
/// while updates.changed().await.is_ok() {
///     if let Some(r) = updates.borrow().get("r-42") {
///         println!("report r-42 is {:?}", r.status);
///     }
/// }
/// # }
/// ```
pub struct StatusFeed {
    message_type: String,
    latest: Arc<Mutex<StatusMap>>,
    snapshots: watch::Sender<StatusMap>,
    subscription: Option<Subscription>,
}

impl StatusFeed {
    pub fn attach(client: &RealtimeClient, message_type: &str, key_field: &str) -> Self {
        let latest: Arc<Mutex<StatusMap>> = Arc::default();
        let (snapshots, _) = watch::channel(StatusMap::new());

        let store = latest.clone();
        let publisher = snapshots.clone();
        let key_field = key_field.to_string();
        let subscription = client.subscribe(
            Topic::message_type(message_type),
            Callback::new(move |envelope: &Envelope| {
                let Some(update) = StatusUpdate::from_payload(&envelope.payload, &key_field, Utc::now())
                else {
                    tracing::debug!(message_type = %envelope.r#type, key_field = %key_field, "status update without key");
                    return;
                };
                let mut latest = store.lock().unwrap_or_else(PoisonError::into_inner);
                tracing::debug!(key = %update.key, status = ?update.status, "status update");
                latest.insert(update.key.clone(), update);
                publisher.send_replace(latest.clone());
            }),
        );

        Self {
            message_type: message_type.to_string(),
            latest,
            snapshots,
            subscription: Some(subscription),
        }
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn get(&self, key: &str) -> Option<StatusUpdate> {
        self.lock().get(key).cloned()
    }

    pub fn all(&self) -> Vec<StatusUpdate> {
        let mut all: Vec<_> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all
    }

    /// Forget one key, e.g. once its job has been acknowledged.
    pub fn clear(&self, key: &str) -> Option<StatusUpdate> {
        let mut latest = self.lock();
        let removed = latest.remove(key);
        if removed.is_some() {
            self.snapshots.send_replace(latest.clone());
        }
        removed
    }

    pub fn watch(&self) -> watch::Receiver<StatusMap> {
        self.snapshots.subscribe()
    }

    pub fn detach(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StatusMap> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for StatusFeed {
    fn drop(&mut self) {
        self.detach();
    }
}
