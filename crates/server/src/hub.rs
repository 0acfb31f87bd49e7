//! Channel fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use tally_shared::Envelope;
use tokio::sync::{broadcast, RwLock};

/// Broadcast senders per channel plus one for messages addressed to everyone.
#[derive(Clone)]
pub struct Hub {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<Envelope>>>>,
    global: broadcast::Sender<Envelope>,
    capacity: usize,
}

impl Hub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::default(),
            global: broadcast::channel(capacity).0,
            capacity,
        }
    }

    /// Get or create the sender for `channel`.
    async fn sender(&self, channel: &str) -> broadcast::Sender<Envelope> {
        {
            let channels = self.channels.read().await;
            if let Some(sender) = channels.get(channel) {
                return sender.clone();
            }
        }

        let mut channels = self.channels.write().await;
        if let Some(sender) = channels.get(channel) {
            return sender.clone();
        }

        let (tx, _rx) = broadcast::channel(self.capacity);
        channels.insert(channel.to_string(), tx.clone());
        tx
    }

    pub async fn subscribe(&self, channel: &str) -> broadcast::Receiver<Envelope> {
        self.sender(channel).await.subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<Envelope> {
        self.global.subscribe()
    }

    /// Send to everyone subscribed to `channel`. The envelope is tagged with
    /// the channel and stamped. Returns how many subscribers it reached.
    pub async fn publish(&self, channel: &str, envelope: Envelope) -> usize {
        let envelope = envelope.with_channel(channel).stamped();
        let sender = self.channels.read().await.get(channel).cloned();
        match sender {
            Some(sender) => sender.send(envelope).unwrap_or(0),
            None => 0,
        }
    }

    /// Send to every connection.
    pub fn broadcast(&self, envelope: Envelope) -> usize {
        self.global.send(envelope.stamped()).unwrap_or(0)
    }

    /// Drop senders nobody listens to any more.
    pub async fn prune(&self) -> usize {
        let mut channels = self.channels.write().await;
        let before = channels.len();
        channels.retain(|_, sender| sender.receiver_count() > 0);
        before - channels.len()
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}
