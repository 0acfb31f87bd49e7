//! Channel publishing.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use tally_shared::{Envelope, MessageKind};

use crate::error::Problem;
use crate::routes::Delivered;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

/// Publish an application message to a channel
pub async fn publish(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    body: Result<Json<PublishRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Delivered>), Problem> {
    let Json(request) = body?;
    let kind = request.kind.trim();
    if kind.is_empty() {
        return Err(Problem::bad_request("message `type` must not be empty"));
    }
    if MessageKind::classify(kind).is_control() {
        return Err(Problem::bad_request(format!("`{kind}` is a control type")));
    }

    let delivered = state
        .hub
        .publish(&channel, Envelope::new(kind, request.payload))
        .await;
    tracing::debug!(%channel, message_type = kind, delivered, "published");
    Ok((StatusCode::ACCEPTED, Json(Delivered { delivered })))
}
