//! Test helpers: a scripted in-memory connector and an event recorder.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use serde_json::Value;
use tally_client::{
    Callback, ConnectionEvent, Connector, Envelope, EventKind, Link, LinkEvent, Outgoing,
    RealtimeClient, RealtimeConfig, Subscription, TransportError,
};

pub const MOCK_URL: &str = "ws://mock.test/api/ws";

pub fn config() -> RealtimeConfig {
    RealtimeConfig::default().with_url(MOCK_URL)
}

/// Let every ready task run. Under a paused clock this does not move time
/// past any pending timer.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Move the paused clock forward, then let the driver catch up.
pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    settle().await;
}

#[derive(Default)]
struct Script {
    refuse_all: bool,
    refuse_next: usize,
    attempts: Vec<String>,
    accepted: VecDeque<ServerEnd>,
}

/// Accepts every connection unless told otherwise. The server side of each
/// accepted link is queued for the test to pick up with [`MockConnector::accept`].
#[derive(Clone, Default)]
pub struct MockConnector {
    script: Arc<Mutex<Script>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_all(&self, refuse: bool) {
        self.script.lock().unwrap().refuse_all = refuse;
    }

    pub fn refuse_next(&self, count: usize) {
        self.script.lock().unwrap().refuse_next = count;
    }

    /// Every connection attempt so far, accepted or not.
    pub fn attempts(&self) -> usize {
        self.script.lock().unwrap().attempts.len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.script.lock().unwrap().attempts.clone()
    }

    /// The server side of the oldest accepted link not yet picked up.
    pub fn accept(&self) -> ServerEnd {
        self.script
            .lock()
            .unwrap()
            .accepted
            .pop_front()
            .expect("no accepted link waiting")
    }

    pub fn has_pending_link(&self) -> bool {
        !self.script.lock().unwrap().accepted.is_empty()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        let mut script = self.script.lock().unwrap();
        script.attempts.push(url.to_string());
        if script.refuse_all || script.refuse_next > 0 {
            script.refuse_next = script.refuse_next.saturating_sub(1);
            return Err(TransportError::Handshake("connection refused".into()));
        }

        let (writer, outgoing) = unbounded();
        let (events_tx, events) = unbounded();
        script.accepted.push_back(ServerEnd {
            outgoing,
            events: events_tx,
            close_requested: false,
        });
        Ok(Link { writer, events })
    }
}

/// The far end of one mock link.
pub struct ServerEnd {
    outgoing: UnboundedReceiver<Outgoing>,
    events: UnboundedSender<LinkEvent>,
    close_requested: bool,
}

impl ServerEnd {
    pub fn push(&self, frame: Value) {
        self.push_raw(&frame.to_string());
    }

    pub fn push_raw(&self, frame: &str) {
        self.events
            .unbounded_send(LinkEvent::Frame(frame.to_string()))
            .expect("client detached from link");
    }

    /// Simulate the network dropping the link.
    pub fn drop_link(&self, reason: &str) {
        let _ = self.events.unbounded_send(LinkEvent::Closed {
            reason: Some(reason.to_string()),
        });
    }

    /// Everything the client wrote since the last call.
    pub fn received(&mut self) -> Vec<Envelope> {
        let mut frames = Vec::new();
        while let Ok(Some(out)) = self.outgoing.try_next() {
            match out {
                Outgoing::Text(text) => frames.push(Envelope::parse(&text).expect("client wrote bad frame")),
                Outgoing::Close => self.close_requested = true,
            }
        }
        frames
    }

    pub fn received_types(&mut self) -> Vec<String> {
        self.received().into_iter().map(|e| e.r#type).collect()
    }

    /// Whether the client asked to close this link (checked after `received`).
    pub fn close_requested(&mut self) -> bool {
        self.received();
        self.close_requested
    }
}

/// Records every lifecycle event.
pub struct EventLog {
    events: Arc<Mutex<Vec<ConnectionEvent>>>,
    _subscriptions: Vec<Subscription>,
}

impl EventLog {
    pub fn attach(client: &RealtimeClient) -> Self {
        let events: Arc<Mutex<Vec<ConnectionEvent>>> = Arc::default();
        let sink = events.clone();
        let record = Callback::new(move |event: &ConnectionEvent| {
            sink.lock().unwrap().push(event.clone());
        });
        let subscriptions = [
            EventKind::Connected,
            EventKind::Disconnected,
            EventKind::Reconnecting,
            EventKind::Reconnected,
            EventKind::MaxReconnectAttemptsReached,
            EventKind::Error,
        ]
        .into_iter()
        .map(|kind| client.on(kind, record.clone()))
        .collect();
        Self {
            events,
            _subscriptions: subscriptions,
        }
    }

    pub fn events(&self) -> Vec<ConnectionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().iter().map(ConnectionEvent::kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }

    pub fn reconnect_delays(&self) -> Vec<Duration> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ConnectionEvent::Reconnecting { delay, .. } => Some(delay),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

/// Collects envelopes delivered to one listener.
#[derive(Clone, Default)]
pub struct Inbox {
    messages: Arc<Mutex<Vec<Envelope>>>,
}

impl Inbox {
    pub fn callback(&self) -> Callback<Envelope> {
        let messages = self.messages.clone();
        Callback::new(move |msg: &Envelope| messages.lock().unwrap().push(msg.clone()))
    }

    pub fn messages(&self) -> Vec<Envelope> {
        self.messages.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}
