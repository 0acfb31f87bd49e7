//! Notification materialization: turns routed `notification` messages into a
//! bounded, most-recent-first list with an unread counter.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use tally_shared::{Envelope, Notification, ToastCategory, TYPE_NOTIFICATION};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::client::{RealtimeClient, Subscription};
use crate::event::{Callback, ConnectionEvent, EventKind};
use crate::registry::Topic;

/// Longest gap between two auto-read sweeps.
const SWEEP_PERIOD: Duration = Duration::from_secs(5);
const TOAST_BUFFER: usize = 32;

/// Which notifications a view wants to see.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NotificationFilter {
    #[default]
    All,
    Unread,
    /// Only these `type` values.
    Types(Vec<String>),
}

impl NotificationFilter {
    pub fn matches(&self, notification: &Notification) -> bool {
        match self {
            NotificationFilter::All => true,
            NotificationFilter::Unread => !notification.read,
            NotificationFilter::Types(types) => types.iter().any(|t| *t == notification.kind),
        }
    }
}

/// The bounded list and its unread counter. No I/O; arrival times come from
/// the caller or from the tokio clock.
#[derive(Debug, Clone)]
pub struct NotificationStore {
    /// Most recent first.
    items: VecDeque<Entry>,
    capacity: usize,
    unread: usize,
}

#[derive(Debug, Clone)]
struct Entry {
    notification: Notification,
    arrived: Instant,
}

impl NotificationStore {
    /// A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            unread: 0,
        }
    }

    /// Insert at the front, arriving now.
    pub fn push(&mut self, notification: Notification) -> bool {
        self.push_at(notification, Instant::now())
    }

    /// Insert at the front, evicting the oldest entry past capacity.
    /// Returns false (and changes nothing) if the id is already present.
    pub fn push_at(&mut self, notification: Notification, arrived: Instant) -> bool {
        if self.get(&notification.id).is_some() {
            return false;
        }
        if !notification.read {
            self.unread += 1;
        }
        self.items.push_front(Entry {
            notification,
            arrived,
        });
        while self.items.len() > self.capacity {
            if let Some(evicted) = self.items.pop_back() {
                if !evicted.notification.read {
                    self.unread -= 1;
                }
            }
        }
        true
    }

    /// Returns true if the notification went from unread to read.
    pub fn mark_as_read(&mut self, id: &str) -> bool {
        match self.items.iter_mut().find(|e| e.notification.id == id) {
            Some(e) if !e.notification.read => {
                e.notification.read = true;
                self.unread -= 1;
                true
            }
            _ => false,
        }
    }

    /// Returns how many were marked.
    pub fn mark_all_as_read(&mut self) -> usize {
        let marked = self.unread;
        for e in self.items.iter_mut() {
            e.notification.read = true;
        }
        self.unread = 0;
        marked
    }

    pub fn remove(&mut self, id: &str) -> Option<Notification> {
        let index = self.items.iter().position(|e| e.notification.id == id)?;
        let removed = self.items.remove(index)?.notification;
        if !removed.read {
            self.unread -= 1;
        }
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.unread = 0;
    }

    /// Mark read every unread notification that arrived at least `after`
    /// before `now`. Returns how many were marked; a repeat sweep marks none.
    pub fn sweep_auto_read(&mut self, now: Instant, after: Duration) -> usize {
        let mut marked = 0;
        for e in self.items.iter_mut().filter(|e| !e.notification.read) {
            if now.saturating_duration_since(e.arrived) >= after {
                e.notification.read = true;
                marked += 1;
            }
        }
        self.unread -= marked;
        marked
    }

    pub fn unread_count(&self) -> usize {
        self.unread
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.iter().find(|n| n.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.items.iter().map(|e| &e.notification)
    }

    pub fn to_vec(&self) -> Vec<Notification> {
        self.iter().cloned().collect()
    }

    /// Matching notifications in stored order. The store is untouched.
    pub fn filtered(&self, filter: &NotificationFilter) -> Vec<Notification> {
        self.iter().filter(|n| filter.matches(n)).cloned().collect()
    }
}

/// What a view renders from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationSnapshot {
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
    pub is_connected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastPriority {
    /// Dismisses itself.
    Normal,
    /// Stays until the user acts on it.
    Persistent,
}

/// A transient UI notice.
#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub category: ToastCategory,
    pub priority: ToastPriority,
    pub title: String,
    pub message: String,
    pub notification_id: Option<String>,
}

impl Toast {
    fn for_notification(notification: &Notification) -> Self {
        Self {
            category: notification.category(),
            priority: ToastPriority::Normal,
            title: notification.title.clone(),
            message: notification.message.clone(),
            notification_id: Some(notification.id.clone()),
        }
    }

    fn connection_lost(attempts: u32) -> Self {
        Self {
            category: ToastCategory::Error,
            priority: ToastPriority::Persistent,
            title: "Connection lost".to_string(),
            message: format!(
                "Real-time updates stopped after {} reconnect attempts. Reconnect to resume.",
                attempts
            ),
            notification_id: None,
        }
    }
}

struct CenterInner {
    store: NotificationStore,
    is_connected: bool,
}

struct CenterState {
    inner: Mutex<CenterInner>,
    snapshots: watch::Sender<NotificationSnapshot>,
    toasts: broadcast::Sender<Toast>,
    show_toasts: bool,
}

impl CenterState {
    fn lock(&self) -> MutexGuard<'_, CenterInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` under the lock and publish a fresh snapshot afterwards.
    fn update<R>(&self, f: impl FnOnce(&mut CenterInner) -> R) -> R {
        let mut inner = self.lock();
        let result = f(&mut inner);
        self.snapshots.send_replace(NotificationSnapshot {
            notifications: inner.store.to_vec(),
            unread_count: inner.store.unread_count(),
            is_connected: inner.is_connected,
        });
        result
    }

    fn receive(&self, envelope: &Envelope) {
        let notification = Notification::from_envelope(envelope, Utc::now());
        let toast = self.show_toasts.then(|| Toast::for_notification(&notification));
        let id = notification.id.clone();

        let inserted = self.update(|inner| inner.store.push(notification));
        if !inserted {
            tracing::debug!(%id, "ignoring duplicate notification");
            return;
        }
        tracing::debug!(%id, "notification received");
        if let Some(toast) = toast {
            self.toast(toast);
        }
    }

    fn set_connected(&self, connected: bool) {
        self.update(|inner| inner.is_connected = connected);
    }

    fn toast(&self, toast: Toast) {
        // No receivers is fine: nobody is rendering toasts.
        let _ = self.toasts.send(toast);
    }

    fn sweep(&self, after: Duration) -> usize {
        let marked = self.update(|inner| inner.store.sweep_auto_read(Instant::now(), after));
        if marked > 0 {
            tracing::debug!(marked, "auto-marked notifications as read");
        }
        marked
    }
}

/// Keeps the notification list for one [`RealtimeClient`].
///
/// Construct with [`NotificationCenter::attach`]; dropping the center (or
/// calling [`detach`](Self::detach)) unregisters its listeners and stops the
/// auto-read sweep.
pub struct NotificationCenter {
    state: Arc<CenterState>,
    subscriptions: Vec<Subscription>,
    sweeper: Option<JoinHandle<()>>,
}

impl NotificationCenter {
    /// Start materializing notifications from `client`. Must be called inside
    /// a tokio runtime when auto-read is enabled.
    pub fn attach(client: &RealtimeClient) -> Self {
        let config = client.config();
        let (snapshots, _) = watch::channel(NotificationSnapshot {
            is_connected: client.is_connected(),
            ..Default::default()
        });
        let (toasts, _) = broadcast::channel(TOAST_BUFFER);
        let state = Arc::new(CenterState {
            inner: Mutex::new(CenterInner {
                store: NotificationStore::new(config.max_notifications),
                is_connected: client.is_connected(),
            }),
            snapshots,
            toasts,
            show_toasts: config.show_toasts,
        });

        let mut subscriptions = Vec::new();

        let on_message = state.clone();
        subscriptions.push(client.subscribe(
            Topic::message_type(TYPE_NOTIFICATION),
            Callback::new(move |envelope: &Envelope| on_message.receive(envelope)),
        ));

        let on_event = state.clone();
        let lifecycle = Callback::new(move |event: &ConnectionEvent| match event {
            ConnectionEvent::Connected | ConnectionEvent::Reconnected => {
                on_event.set_connected(true)
            }
            ConnectionEvent::Disconnected { .. } | ConnectionEvent::Reconnecting { .. } => {
                on_event.set_connected(false)
            }
            ConnectionEvent::MaxReconnectAttemptsReached { attempts } => {
                on_event.set_connected(false);
                on_event.toast(Toast::connection_lost(*attempts));
            }
            _ => {}
        });
        for kind in [
            EventKind::Connected,
            EventKind::Reconnected,
            EventKind::Disconnected,
            EventKind::Reconnecting,
            EventKind::MaxReconnectAttemptsReached,
        ] {
            subscriptions.push(client.on(kind, lifecycle.clone()));
        }

        let sweeper = config
            .auto_mark_read_after()
            .map(|after| tokio::spawn(sweep_loop(Arc::downgrade(&state), after)));

        Self {
            state,
            subscriptions,
            sweeper,
        }
    }

    /// Unregister from the client and stop the sweep. The list is kept.
    pub fn detach(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state.lock().store.to_vec()
    }

    pub fn unread_count(&self) -> usize {
        self.state.lock().store.unread_count()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().is_connected
    }

    pub fn filtered(&self, filter: &NotificationFilter) -> Vec<Notification> {
        self.state.lock().store.filtered(filter)
    }

    pub fn mark_as_read(&self, id: &str) -> bool {
        self.state.update(|inner| inner.store.mark_as_read(id))
    }

    pub fn mark_all_as_read(&self) -> usize {
        self.state.update(|inner| inner.store.mark_all_as_read())
    }

    pub fn remove_notification(&self, id: &str) -> Option<Notification> {
        self.state.update(|inner| inner.store.remove(id))
    }

    pub fn clear_all(&self) {
        self.state.update(|inner| inner.store.clear());
    }

    /// Run one auto-read sweep now. Returns how many were marked.
    pub fn sweep_auto_read(&self, after: Duration) -> usize {
        self.state.sweep(after)
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<NotificationSnapshot> {
        self.state.snapshots.subscribe()
    }

    pub fn subscribe_toasts(&self) -> broadcast::Receiver<Toast> {
        self.state.toasts.subscribe()
    }
}

impl Drop for NotificationCenter {
    fn drop(&mut self) {
        self.detach();
    }
}

async fn sweep_loop(state: Weak<CenterState>, after: Duration) {
    let mut ticker = tokio::time::interval(after.min(SWEEP_PERIOD));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(state) = state.upgrade() else {
            return;
        };
        state.sweep(after);
    }
}
