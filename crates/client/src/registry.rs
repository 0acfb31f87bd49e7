//! Channel and message-type subscriptions.
//!
//! A channel is subscribed on the wire exactly while it has at least one
//! listener. Message-type listeners are local only.

use std::fmt;

use tally_shared::Envelope;

use crate::event::{Callback, ListenerId, ListenerMap};

/// What a listener is interested in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Topic {
    /// A pub/sub channel; drives `SUBSCRIBE`/`UNSUBSCRIBE` frames.
    Channel(String),
    /// Every inbound message with this `type`.
    MessageType(String),
}

impl Topic {
    pub fn channel(name: impl Into<String>) -> Self {
        Topic::Channel(name.into())
    }

    pub fn message_type(name: impl Into<String>) -> Self {
        Topic::MessageType(name.into())
    }

    pub fn channel_name(&self) -> Option<&str> {
        match self {
            Topic::Channel(name) => Some(name),
            Topic::MessageType(_) => None,
        }
    }
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        Topic::Channel(name.to_string())
    }
}

impl From<String> for Topic {
    fn from(name: String) -> Self {
        Topic::Channel(name)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Channel(name) => write!(f, "channel:{}", name),
            Topic::MessageType(name) => write!(f, "type:{}", name),
        }
    }
}

pub(crate) struct SubscriptionRegistry {
    listeners: ListenerMap<Topic, Envelope>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            listeners: ListenerMap::new(),
        }
    }

    /// Register a listener. Returns its id and, for the first listener on a
    /// channel, the `SUBSCRIBE` frame to put on the wire.
    pub fn add(&mut self, topic: Topic, callback: Callback<Envelope>) -> (ListenerId, Option<Envelope>) {
        let frame = match &topic {
            Topic::Channel(name) => Some(Envelope::subscribe(name)),
            Topic::MessageType(_) => None,
        };
        let inserted = self.listeners.insert(topic, callback);
        (inserted.id, frame.filter(|_| inserted.first_for_key))
    }

    /// Remove a listener. Returns the `UNSUBSCRIBE` frame when it was the last
    /// one on its channel.
    pub fn remove(&mut self, topic: &Topic, id: ListenerId) -> Option<Envelope> {
        let was_last = self.listeners.remove(topic, id)?;
        match topic {
            Topic::Channel(name) if was_last => Some(Envelope::unsubscribe(name)),
            _ => None,
        }
    }

    /// One `SUBSCRIBE` per channel that still has listeners.
    pub fn replay_frames(&self) -> Vec<Envelope> {
        self.channels().into_iter().map(Envelope::subscribe).collect()
    }

    pub fn channels(&self) -> Vec<&str> {
        self.listeners
            .keys()
            .filter_map(Topic::channel_name)
            .collect()
    }

    pub fn type_listeners(&self, message_type: &str) -> Vec<Callback<Envelope>> {
        self.listeners
            .listeners(&Topic::MessageType(message_type.to_string()))
    }

    /// Type listeners first, then channel listeners.
    pub fn listeners_for(&self, envelope: &Envelope) -> Vec<Callback<Envelope>> {
        let mut out = self.type_listeners(&envelope.r#type);
        if let Some(channel) = &envelope.channel {
            out.extend(self.listeners.listeners(&Topic::Channel(channel.clone())));
        }
        out
    }

    pub fn listener_count(&self, topic: &Topic) -> usize {
        self.listeners.len(topic)
    }
}
