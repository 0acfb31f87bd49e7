//! Connection state machine.

/// Connection state for the realtime link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Turned off, or no endpoint configured. No connection is attempted.
    Disabled,
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Error { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, ConnectionState::Disabled)
    }
}

/// How the last link ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// We asked for it (`disconnect`, `reconnect`, `shutdown`). Never retried.
    Clean,
    /// Dropped by the peer or the network. Retried.
    Unclean,
}

/// The per-client connection record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub state: ConnectionState,
    pub url: Option<String>,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub last_error: Option<String>,
    pub last_close: Option<CloseKind>,
    /// A link was up at some point since the last explicit `disconnect`.
    pub(crate) ever_connected: bool,
}

impl Connection {
    pub(crate) fn new(enabled: bool, url: Option<String>, max_reconnect_attempts: u32) -> Self {
        Self {
            state: if enabled {
                ConnectionState::Disconnected
            } else {
                ConnectionState::Disabled
            },
            url,
            reconnect_attempts: 0,
            max_reconnect_attempts,
            last_error: None,
            last_close: None,
            ever_connected: false,
        }
    }

    /// A link just opened. Returns true if this is a re-connection.
    pub(crate) fn opened(&mut self) -> bool {
        let again = self.ever_connected;
        self.state = ConnectionState::Connected;
        self.reconnect_attempts = 0;
        self.last_error = None;
        self.last_close = None;
        self.ever_connected = true;
        again
    }

    pub(crate) fn closed(&mut self, kind: CloseKind) {
        self.state = ConnectionState::Disconnected;
        self.last_close = Some(kind);
        if kind == CloseKind::Clean {
            self.reconnect_attempts = 0;
        }
    }

    pub(crate) fn failed(&mut self, reason: String) {
        self.last_error = Some(reason.clone());
        self.state = ConnectionState::Error { reason };
    }

    /// Whether an unclean close should be followed by automatic retries.
    pub(crate) fn should_retry(&self) -> bool {
        !self.state.is_disabled() && self.last_close != Some(CloseKind::Clean)
    }
}
