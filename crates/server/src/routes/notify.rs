//! Notification publishing.

use axum::{extract::rejection::JsonRejection, extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::Deserialize;
use tally_shared::{Envelope, NotificationPayload, TYPE_NOTIFICATION};
use uuid::Uuid;

use crate::error::Problem;
use crate::routes::Delivered;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyRequest {
    /// Deliver only to subscribers of this channel. Everyone when absent.
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(flatten)]
    pub notification: NotificationPayload,
}

/// Publish a notification
pub async fn notify(
    State(state): State<AppState>,
    body: Result<Json<NotifyRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Delivered>), Problem> {
    let Json(request) = body?;
    let mut notification = request.notification;
    if notification.title.trim().is_empty() && notification.message.trim().is_empty() {
        return Err(Problem::bad_request("a notification needs a title or a message"));
    }
    // Stable ids let clients drop redeliveries.
    notification.id.get_or_insert_with(|| Uuid::new_v4().to_string());
    notification.timestamp.get_or_insert_with(Utc::now);

    let payload = serde_json::to_value(&notification)
        .map_err(|e| Problem::internal(format!("failed to encode notification: {e}")))?;
    let envelope = Envelope::new(TYPE_NOTIFICATION, payload);

    let delivered = match request.channel.as_deref().filter(|c| !c.is_empty()) {
        Some(channel) => state.hub.publish(channel, envelope).await,
        None => state.hub.broadcast(envelope),
    };
    tracing::info!(
        id = notification.id.as_deref().unwrap_or_default(),
        channel = request.channel.as_deref().unwrap_or("*"),
        delivered,
        "notification published"
    );
    Ok((StatusCode::ACCEPTED, Json(Delivered { delivered })))
}
