//! WebSocket handler: the server side of the realtime protocol.

use std::collections::HashMap;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tally_shared::{now_millis, Envelope, MessageKind, TYPE_HEARTBEAT};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::Problem;
use crate::hub::Hub;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler. The token is checked before the upgrade
/// headers, so unauthenticated callers always see a 401.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, Problem> {
    if !state.accepts_token(query.token.as_deref()) {
        tracing::warn!("rejecting websocket with a bad or missing token");
        return Err(Problem::unauthorized("missing or invalid session token"));
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state.hub.clone())))
}

async fn handle_socket(socket: WebSocket, hub: Hub) {
    let conn_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    tracing::info!(%conn_id, "websocket connected");

    let (forward_tx, mut forward_rx) = mpsc::unbounded_channel::<Envelope>();
    let mut subscriptions: HashMap<String, JoinHandle<()>> = HashMap::new();

    let global = tokio::spawn(forward(hub.subscribe_all(), forward_tx.clone()));

    let send_task = tokio::spawn(async move {
        while let Some(envelope) = forward_rx.recv().await {
            let frame = match envelope.to_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(error = %e, "dropping unserializable envelope");
                    continue;
                }
            };
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match Envelope::parse(text.as_str()) {
                Ok(envelope) => {
                    handle_client_message(&hub, envelope, &mut subscriptions, &forward_tx).await
                }
                Err(e) => tracing::warn!(%conn_id, error = %e, "ignoring malformed frame"),
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "websocket read failed");
                break;
            }
            _ => {}
        }
    }

    global.abort();
    for (_, handle) in subscriptions {
        handle.abort();
    }
    send_task.abort();
    let pruned = hub.prune().await;
    tracing::info!(%conn_id, pruned, "websocket closed");
}

async fn handle_client_message(
    hub: &Hub,
    envelope: Envelope,
    subscriptions: &mut HashMap<String, JoinHandle<()>>,
    forward_tx: &mpsc::UnboundedSender<Envelope>,
) {
    match envelope.kind() {
        MessageKind::Subscribe => {
            let Some(channel) = envelope.control_channel().map(str::to_string) else {
                tracing::debug!("SUBSCRIBE without a channel");
                return;
            };
            if subscriptions.contains_key(&channel) {
                return;
            }
            tracing::debug!(%channel, "subscribe");
            let receiver = hub.subscribe(&channel).await;
            subscriptions.insert(
                channel.clone(),
                tokio::spawn(forward(receiver, forward_tx.clone())),
            );
            let _ = forward_tx.send(Envelope::subscribe(&channel).with_channel(channel));
        }
        MessageKind::Unsubscribe => {
            let Some(channel) = envelope.control_channel().map(str::to_string) else {
                return;
            };
            tracing::debug!(%channel, "unsubscribe");
            if let Some(handle) = subscriptions.remove(&channel) {
                handle.abort();
            }
            let _ = forward_tx.send(Envelope::unsubscribe(&channel).with_channel(channel));
        }
        MessageKind::Heartbeat => {
            let server_time = now_millis();
            let echoed = envelope
                .payload
                .get("timestamp")
                .cloned()
                .or_else(|| envelope.timestamp.map(Into::into))
                .unwrap_or_else(|| server_time.into());
            let ack = Envelope::new(
                TYPE_HEARTBEAT,
                json!({ "timestamp": echoed, "serverTime": server_time }),
            )
            .with_timestamp(server_time);
            let _ = forward_tx.send(ack);
        }
        MessageKind::Notification | MessageKind::Other(_) => {
            tracing::debug!(message_type = %envelope.r#type, "ignoring client message");
        }
    }
}

/// Pump one broadcast stream into a connection's outbound queue.
async fn forward(mut receiver: broadcast::Receiver<Envelope>, out: mpsc::UnboundedSender<Envelope>) {
    loop {
        match receiver.recv().await {
            Ok(envelope) => {
                if out.send(envelope).is_err() {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "slow subscriber skipped messages");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
