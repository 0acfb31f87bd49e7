//! The task that owns the link.
//!
//! Every state transition, subscription replay, queue flush and event
//! dispatch happens here, one at a time, in the order the transport raises
//! them. Public handle methods only post commands or take a short lock.

use std::future::pending;
use std::sync::Arc;

use futures_channel::mpsc::UnboundedReceiver;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use tally_shared::{now_millis, Envelope};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::client::{write_envelope, Inner, Shared};
use crate::error::TransportError;
use crate::event::{dispatch, ConnectionEvent};
use crate::heartbeat::HeartbeatMonitor;
use crate::reconnect::ReconnectDecision;
use crate::router;
use crate::state::{CloseKind, ConnectionState};
use crate::transport::{Connector, Link, LinkEvent, Outgoing};

pub(crate) enum Command {
    Connect(Option<String>),
    Disconnect,
    Reconnect,
    Shutdown,
}

type ConnectFuture = BoxFuture<'static, Result<Link, TransportError>>;

pub(crate) struct Driver {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    /// In-flight connection attempt.
    attempt: Option<ConnectFuture>,
    /// Inbound side of the open link.
    link: Option<UnboundedReceiver<LinkEvent>>,
    /// When the next automatic retry fires.
    retry_at: Option<Instant>,
    heartbeat: Option<(Interval, HeartbeatMonitor)>,
}

impl Driver {
    pub fn new(shared: Arc<Shared>, connector: Arc<dyn Connector>) -> Self {
        Self {
            shared,
            connector,
            attempt: None,
            link: None,
            retry_at: None,
            heartbeat: None,
        }
    }

    pub async fn run(mut self, mut commands: UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.next() => match command {
                    Some(Command::Connect(url)) => self.connect(url),
                    Some(Command::Disconnect) => self.disconnect(),
                    Some(Command::Reconnect) => self.reconnect(),
                    Some(Command::Shutdown) | None => {
                        self.disconnect();
                        break;
                    }
                },
                result = next_attempt_result(&mut self.attempt) => {
                    self.attempt = None;
                    match result {
                        Ok(link) => self.opened(link),
                        Err(e) => self.attempt_failed(e),
                    }
                }
                event = next_link_event(&mut self.link) => match event {
                    LinkEvent::Frame(frame) => {
                        if let Some((_, monitor)) = &mut self.heartbeat {
                            monitor.record_activity(Instant::now());
                        }
                        router::route(&self.shared, &frame);
                    }
                    LinkEvent::Closed { reason } => self.dropped(reason),
                },
                _ = sleep_until(self.retry_at) => {
                    self.retry_at = None;
                    self.retry();
                }
                _ = next_tick(&mut self.heartbeat) => self.heartbeat_tick(),
            }
        }
        tracing::debug!("realtime driver stopped");
    }

    fn connect(&mut self, url: Option<String>) {
        if !self.shared.config.enabled {
            tracing::debug!("realtime disabled; ignoring connect");
            return;
        }

        let endpoint = {
            let mut inner = self.shared.lock();
            if let Some(url) = url {
                inner.connection.url = Some(url);
            }
            if inner.connection.state.is_connected() || self.attempt.is_some() {
                tracing::debug!("already connected or connecting");
                return;
            }
            let Some(endpoint) = inner.connection.url.clone() else {
                tracing::info!("no realtime endpoint configured; staying disabled");
                inner.connection.state = ConnectionState::Disabled;
                return;
            };
            inner.connection.state = ConnectionState::Connecting;
            inner.connection.reconnect_attempts = 0;
            inner.connection.last_close = None;
            endpoint
        };

        self.retry_at = None;
        self.start_attempt(endpoint);
    }

    fn reconnect(&mut self) {
        if !self.shared.config.enabled {
            tracing::debug!("realtime disabled; ignoring reconnect");
            return;
        }
        tracing::info!("manual reconnect");
        if self.close_link() {
            self.shared.lock().connection.closed(CloseKind::Clean);
            self.emit(ConnectionEvent::Disconnected {
                clean: true,
                reason: Some("manual reconnect".to_string()),
            });
        }
        self.attempt = None;
        self.retry_at = None;
        self.connect(None);
    }

    fn disconnect(&mut self) {
        let had_link = self.close_link();
        self.attempt = None;
        self.retry_at = None;
        {
            let mut inner = self.shared.lock();
            if inner.connection.state.is_disabled() {
                return;
            }
            inner.connection.closed(CloseKind::Clean);
            inner.connection.ever_connected = false;
        }
        tracing::info!("disconnected");
        if had_link {
            self.emit(ConnectionEvent::Disconnected {
                clean: true,
                reason: None,
            });
        }
    }

    fn start_attempt(&mut self, endpoint: String) {
        tracing::info!(url = %endpoint, "connecting");
        let connector = self.connector.clone();
        let timeout = self.shared.config.connect_timeout();
        self.attempt = Some(Box::pin(async move {
            match tokio::time::timeout(timeout, connector.connect(&endpoint)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(timeout)),
            }
        }));
    }

    /// Resubscribe, then flush, then announce.
    fn opened(&mut self, link: Link) {
        let reconnected = {
            let mut guard = self.shared.lock();
            let inner: &mut Inner = &mut guard;
            let reconnected = inner.connection.opened();
            inner.writer = Some(link.writer);

            let replayed = inner
                .registry
                .replay_frames()
                .iter()
                .filter(|frame| inner.write(frame))
                .count();
            let Inner { writer, queue, .. } = inner;
            let flushed = queue.flush(|message| write_envelope(writer.as_ref(), message));

            tracing::info!(
                replayed,
                flushed = flushed.sent,
                still_queued = flushed.remaining,
                "connected"
            );
            reconnected
        };

        let interval = self.shared.config.heartbeat_interval();
        let now = Instant::now();
        let mut ticker = interval_at(now + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some((
            ticker,
            HeartbeatMonitor::new(interval, self.shared.config.heartbeat_timeout(), now),
        ));
        self.link = Some(link.events);

        self.emit(if reconnected {
            ConnectionEvent::Reconnected
        } else {
            ConnectionEvent::Connected
        });
    }

    fn attempt_failed(&mut self, error: TransportError) {
        let message = error.to_string();
        tracing::warn!(error = %message, "connection attempt failed");
        self.shared.lock().connection.failed(message.clone());
        self.emit(ConnectionEvent::Error { message });
        self.schedule_retry();
    }

    /// The link went away without us asking.
    fn dropped(&mut self, reason: Option<String>) {
        self.close_link();
        self.shared.lock().connection.closed(CloseKind::Unclean);
        tracing::warn!(reason = reason.as_deref().unwrap_or("unknown"), "link dropped");
        self.emit(ConnectionEvent::Disconnected {
            clean: false,
            reason,
        });
        self.schedule_retry();
    }

    fn schedule_retry(&mut self) {
        let decision = {
            let mut inner = self.shared.lock();
            if !inner.connection.should_retry() {
                return;
            }
            let decision = self
                .shared
                .config
                .reconnect_policy()
                .next(inner.connection.reconnect_attempts);
            match decision {
                ReconnectDecision::Retry { attempt, .. } => {
                    inner.connection.reconnect_attempts = attempt;
                    inner.connection.state = ConnectionState::Reconnecting { attempt };
                }
                ReconnectDecision::Exhausted { attempts } => {
                    inner
                        .connection
                        .failed(format!("gave up after {} reconnect attempts", attempts));
                }
            }
            decision
        };

        match decision {
            ReconnectDecision::Retry { attempt, delay } => {
                tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
                self.retry_at = Some(Instant::now() + delay);
                self.emit(ConnectionEvent::Reconnecting { attempt, delay });
            }
            ReconnectDecision::Exhausted { attempts } => {
                tracing::error!(attempts, "reconnect attempts exhausted; manual reconnect required");
                self.emit(ConnectionEvent::MaxReconnectAttemptsReached { attempts });
            }
        }
    }

    fn retry(&mut self) {
        let endpoint = {
            let inner = self.shared.lock();
            if !matches!(inner.connection.state, ConnectionState::Reconnecting { .. }) {
                return;
            }
            inner.connection.url.clone()
        };
        match endpoint {
            Some(endpoint) => self.start_attempt(endpoint),
            None => tracing::warn!("no endpoint to reconnect to"),
        }
    }

    fn heartbeat_tick(&mut self) {
        let now = Instant::now();
        let Some((_, monitor)) = &self.heartbeat else {
            return;
        };
        if monitor.is_stale(now) {
            let silence = monitor.silence(now);
            tracing::warn!(silence_ms = silence.as_millis() as u64, "heartbeat timed out");
            self.dropped(Some("heartbeat timeout".to_string()));
            return;
        }
        let sent = self.shared.lock().write(&Envelope::heartbeat(now_millis()));
        tracing::debug!(sent, "heartbeat");
    }

    /// Tear down the open link, if any. Returns whether there was one.
    fn close_link(&mut self) -> bool {
        self.heartbeat = None;
        let had_link = self.link.take().is_some();
        if let Some(writer) = self.shared.lock().writer.take() {
            let _ = writer.unbounded_send(Outgoing::Close);
        }
        had_link
    }

    fn emit(&self, event: ConnectionEvent) {
        let listeners = self.shared.lock().events.listeners(&event.kind());
        dispatch(&listeners, &event, "event");
    }
}

async fn next_attempt_result(attempt: &mut Option<ConnectFuture>) -> Result<Link, TransportError> {
    match attempt {
        Some(future) => future.await,
        None => pending().await,
    }
}

async fn next_link_event(link: &mut Option<UnboundedReceiver<LinkEvent>>) -> LinkEvent {
    match link {
        Some(events) => events.next().await.unwrap_or(LinkEvent::Closed {
            reason: Some("link dropped".to_string()),
        }),
        None => pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn next_tick(heartbeat: &mut Option<(Interval, HeartbeatMonitor)>) {
    match heartbeat {
        Some((ticker, _)) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}
