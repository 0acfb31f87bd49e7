//! The public realtime client handle.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures_channel::mpsc::{unbounded, UnboundedSender};
use tally_shared::Envelope;

use crate::config::RealtimeConfig;
use crate::driver::{Command, Driver};
use crate::event::{Callback, ConnectionEvent, EventKind, ListenerId, ListenerMap};
use crate::queue::OutboundQueue;
use crate::registry::{SubscriptionRegistry, Topic};
use crate::state::{Connection, ConnectionState};
use crate::transport::{Connector, Outgoing, TungsteniteConnector};

/// Whether [`RealtimeClient::send`] wrote the message or buffered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Queued,
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent)
    }
}

/// State shared by the handle, subscription handles and the driver task.
pub(crate) struct Shared {
    pub config: RealtimeConfig,
    inner: Mutex<Inner>,
}

pub(crate) struct Inner {
    pub connection: Connection,
    /// Present exactly while a link is open.
    pub writer: Option<UnboundedSender<Outgoing>>,
    pub registry: SubscriptionRegistry,
    pub events: ListenerMap<EventKind, ConnectionEvent>,
    pub queue: OutboundQueue,
}

impl Shared {
    fn new(config: RealtimeConfig) -> Self {
        let connection = Connection::new(
            config.enabled,
            config.url.clone(),
            config.max_reconnect_attempts,
        );
        Self {
            config,
            inner: Mutex::new(Inner {
                connection,
                writer: None,
                registry: SubscriptionRegistry::new(),
                events: ListenerMap::new(),
                queue: OutboundQueue::new(),
            }),
        }
    }

    /// Listeners run outside this lock, so a poisoned lock still holds
    /// consistent data.
    pub fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    /// Write on the open link. False when there is none or it has gone away.
    pub fn write(&self, envelope: &Envelope) -> bool {
        write_envelope(self.writer.as_ref(), envelope)
    }
}

pub(crate) fn write_envelope(writer: Option<&UnboundedSender<Outgoing>>, envelope: &Envelope) -> bool {
    let Some(writer) = writer else {
        return false;
    };
    match envelope.to_frame() {
        Ok(frame) => writer.unbounded_send(Outgoing::Text(frame)).is_ok(),
        Err(e) => {
            // Retrying cannot fix an unserializable message.
            tracing::error!(error = %e, message_type = %envelope.r#type, "dropping unserializable message");
            true
        }
    }
}

/// Handle to one realtime connection.
///
/// Cheap to clone; every clone drives the same connection. Construct one at
/// the application root and pass it to whatever needs it.
///
/// ```rust,no_run
/// use tally_client::{Callback, Envelope, RealtimeClient, RealtimeConfig};
///
/// # async fn example() {
/// let client = RealtimeClient::new(RealtimeConfig::default().with_url("ws://localhost:8080/api/ws"));
/// let reports = client.subscribe("reports", Callback::new(|msg: &Envelope| {
///     println!("report update: {}", msg.payload);
/// }));
/// client.connect(None);
/// // ...
/// reports.unsubscribe();
/// client.shutdown();
/// # }
/// ```
#[derive(Clone)]
pub struct RealtimeClient {
    shared: Arc<Shared>,
    commands: UnboundedSender<Command>,
}

impl RealtimeClient {
    /// Create a client using the native WebSocket connector.
    ///
    /// Spawns the driver task, so this must be called inside a tokio runtime.
    pub fn new(config: RealtimeConfig) -> Self {
        Self::with_connector(config, TungsteniteConnector::new())
    }

    pub fn with_connector(config: RealtimeConfig, connector: impl Connector) -> Self {
        let (commands, receiver) = unbounded();
        let shared = Arc::new(Shared::new(config));
        let driver = Driver::new(shared.clone(), Arc::new(connector));
        tokio::spawn(driver.run(receiver));
        Self { shared, commands }
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.shared.config
    }

    /// Start connecting. Idempotent while connected or connecting; a no-op
    /// when disabled or when no endpoint is known.
    pub fn connect(&self, url: Option<&str>) {
        self.command(Command::Connect(url.map(str::to_string)));
    }

    /// Close cleanly and cancel any scheduled retry.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Drop the current link (if any) and connect again now with a fresh
    /// attempt budget.
    pub fn reconnect(&self) {
        self.command(Command::Reconnect);
    }

    /// Disconnect and stop the driver task. Later commands are ignored.
    pub fn shutdown(&self) {
        self.command(Command::Shutdown);
    }

    fn command(&self, command: Command) {
        if self.commands.unbounded_send(command).is_err() {
            tracing::debug!("realtime client is shut down; ignoring command");
        }
    }

    /// Write now if connected, otherwise queue for the next connection.
    pub fn send(&self, message: Envelope) -> SendOutcome {
        let mut inner = self.shared.lock();
        if inner.connection.state.is_connected() && inner.queue.is_empty() && inner.write(&message)
        {
            return SendOutcome::Sent;
        }
        tracing::debug!(message_type = %message.r#type, queued = inner.queue.len() + 1, "queueing message");
        inner.queue.push(message);
        SendOutcome::Queued
    }

    /// Listen on a channel or a message type.
    pub fn subscribe(&self, topic: impl Into<Topic>, callback: Callback<Envelope>) -> Subscription {
        let topic = topic.into();
        let mut inner = self.shared.lock();
        let (id, frame) = inner.registry.add(topic.clone(), callback);
        if let Some(frame) = frame {
            if inner.connection.state.is_connected() {
                inner.write(&frame);
            }
            tracing::debug!(%topic, "subscribed");
        }
        Subscription {
            shared: Arc::downgrade(&self.shared),
            slot: Slot::Topic(topic, id),
        }
    }

    /// Listen for a lifecycle event.
    pub fn on(&self, kind: EventKind, callback: Callback<ConnectionEvent>) -> Subscription {
        let id = self.shared.lock().events.insert(kind, callback).id;
        Subscription {
            shared: Arc::downgrade(&self.shared),
            slot: Slot::Event(kind, id),
        }
    }

    pub fn off(&self, subscription: Subscription) {
        subscription.unsubscribe();
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().connection.state.clone()
    }

    pub fn connection(&self) -> Connection {
        self.shared.lock().connection.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().connection.state.is_connected()
    }

    pub fn queued_len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Drop every queued message. Returns how many were dropped.
    pub fn clear_queue(&self) -> usize {
        self.shared.lock().queue.clear()
    }

    /// Channels currently subscribed (or to be subscribed on connect).
    pub fn active_channels(&self) -> Vec<String> {
        self.shared
            .lock()
            .registry
            .channels()
            .into_iter()
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Topic(Topic, ListenerId),
    Event(EventKind, ListenerId),
}

/// Registration handle returned by [`RealtimeClient::subscribe`] and
/// [`RealtimeClient::on`]. Dropping it leaves the listener registered.
#[must_use = "keep the Subscription to be able to unsubscribe"]
#[derive(Debug)]
pub struct Subscription {
    shared: Weak<Shared>,
    slot: Slot,
}

impl Subscription {
    /// Remove this listener. The last listener on a channel unsubscribes it
    /// on the wire.
    pub fn unsubscribe(self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut inner = shared.lock();
        match &self.slot {
            Slot::Topic(topic, id) => {
                if let Some(frame) = inner.registry.remove(topic, *id) {
                    if inner.connection.state.is_connected() {
                        inner.write(&frame);
                    }
                    tracing::debug!(%topic, "unsubscribed");
                }
            }
            Slot::Event(kind, id) => {
                inner.events.remove(kind, *id);
            }
        }
    }

    pub fn topic(&self) -> Option<&Topic> {
        match &self.slot {
            Slot::Topic(topic, _) => Some(topic),
            Slot::Event(..) => None,
        }
    }
}
