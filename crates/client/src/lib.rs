//! Tally realtime client.
//!
//! One [`RealtimeClient`] per session owns the WebSocket link: it reconnects
//! with exponential backoff, keeps the link alive with heartbeats, replays
//! channel subscriptions after a reconnect, buffers outbound messages while
//! the link is down and routes inbound messages to listeners.
//! [`NotificationCenter`] and [`StatusFeed`] materialize routed messages into
//! state a UI can render.

pub mod auth;
pub mod client;
pub mod config;
mod driver;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod notifications;
pub mod queue;
pub mod reconnect;
pub mod registry;
mod router;
pub mod state;
pub mod status;
pub mod transport;

pub use auth::{StaticToken, TokenProvider};
pub use client::{RealtimeClient, SendOutcome, Subscription};
pub use config::RealtimeConfig;
pub use error::TransportError;
pub use event::{Callback, ConnectionEvent, EventKind, ListenerId};
pub use notifications::{
    NotificationCenter, NotificationFilter, NotificationSnapshot, NotificationStore, Toast,
    ToastPriority,
};
pub use reconnect::{ReconnectDecision, ReconnectPolicy};
pub use registry::Topic;
pub use state::{CloseKind, Connection, ConnectionState};
pub use status::{StatusFeed, StatusMap, StatusUpdate};
pub use transport::{Connector, Link, LinkEvent, Outgoing, TungsteniteConnector};

pub use tally_shared::{Envelope, Notification, ToastCategory};
