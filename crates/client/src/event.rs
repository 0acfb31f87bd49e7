//! Lifecycle events, listener callbacks and the keyed listener table.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tally_shared::Envelope;

/// Lifecycle and data events emitted by [`RealtimeClient`](crate::RealtimeClient).
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// First successful connection of a session.
    Connected,
    /// The link went away. `clean` is true only for a close we initiated.
    Disconnected { clean: bool, reason: Option<String> },
    /// A retry has been scheduled.
    Reconnecting { attempt: u32, delay: Duration },
    /// The link is back after having been up earlier in the session.
    Reconnected,
    /// Automatic retries are exhausted; only a manual reconnect resumes.
    MaxReconnectAttemptsReached { attempts: u32 },
    Error { message: String },
    /// Every inbound message, before type and channel listeners.
    Message(Envelope),
}

impl ConnectionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ConnectionEvent::Connected => EventKind::Connected,
            ConnectionEvent::Disconnected { .. } => EventKind::Disconnected,
            ConnectionEvent::Reconnecting { .. } => EventKind::Reconnecting,
            ConnectionEvent::Reconnected => EventKind::Reconnected,
            ConnectionEvent::MaxReconnectAttemptsReached { .. } => {
                EventKind::MaxReconnectAttemptsReached
            }
            ConnectionEvent::Error { .. } => EventKind::Error,
            ConnectionEvent::Message(_) => EventKind::Message,
        }
    }
}

/// Key for [`RealtimeClient::on`](crate::RealtimeClient::on).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Reconnecting,
    Reconnected,
    MaxReconnectAttemptsReached,
    Error,
    Message,
}

/// A shareable listener.
///
/// Clones refer to the same listener: registering a clone under a key that
/// already holds it does not add a second delivery.
pub struct Callback<T>(Arc<dyn Fn(&T) + Send + Sync>);

impl<T> Callback<T> {
    pub fn new(f: impl Fn(&T) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn same(&self, other: &Callback<T>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }

    /// Run the listener, containing any panic. Returns false if it panicked.
    pub(crate) fn invoke(&self, value: &T) -> bool {
        panic::catch_unwind(AssertUnwindSafe(|| (self.0)(value))).is_ok()
    }
}

impl<T> Clone for Callback<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> fmt::Debug for Callback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({:p})", Arc::as_ptr(&self.0))
    }
}

/// Invoke each listener in turn; a panicking listener is logged and skipped.
pub(crate) fn dispatch<T>(listeners: &[Callback<T>], value: &T, what: &str) {
    for listener in listeners {
        if !listener.invoke(value) {
            tracing::warn!(listener = ?listener, "{} listener panicked", what);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

/// Outcome of [`ListenerMap::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Inserted {
    pub id: ListenerId,
    /// The key had no listeners before this call.
    pub first_for_key: bool,
}

/// Listener sets keyed by `K`, with stable ids for removal.
pub(crate) struct ListenerMap<K, T> {
    next_id: u64,
    entries: BTreeMap<K, Vec<(ListenerId, Callback<T>)>>,
}

impl<K: Ord + Clone, T> ListenerMap<K, T> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: K, callback: Callback<T>) -> Inserted {
        let listeners = self.entries.entry(key).or_default();
        if let Some((id, _)) = listeners.iter().find(|(_, cb)| cb.same(&callback)) {
            return Inserted {
                id: *id,
                first_for_key: false,
            };
        }

        let first_for_key = listeners.is_empty();
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        listeners.push((id, callback));
        Inserted { id, first_for_key }
    }

    /// Remove one listener. Returns `Some(true)` when it was the last one for
    /// its key, `None` when the id was not registered.
    pub fn remove(&mut self, key: &K, id: ListenerId) -> Option<bool> {
        let listeners = self.entries.get_mut(key)?;
        let index = listeners.iter().position(|(lid, _)| *lid == id)?;
        listeners.remove(index);
        if listeners.is_empty() {
            self.entries.remove(key);
            Some(true)
        } else {
            Some(false)
        }
    }

    pub fn listeners(&self, key: &K) -> Vec<Callback<T>> {
        self.entries
            .get(key)
            .map(|listeners| listeners.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn len(&self, key: &K) -> usize {
        self.entries.get(key).map(Vec::len).unwrap_or(0)
    }
}
